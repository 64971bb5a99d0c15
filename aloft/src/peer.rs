use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpStream;
use tracing::{info, warn};

use aloft_base::{err, PeerId, Result};
use aloft_eval::{CallOutcome, Interpreter, ObjectRef, Thread, Value};
use aloft_net::{ConnectionEngine, ConnectionHandler, PeerDirectory};
use aloft_obj::ObjectStore;
use aloft_txn::{NullTransport, TransactionEngine};

use crate::handler::PeerConnectionHandler;
use crate::transport::BroadcastTransport;

const DIAL_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DIAL_INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const DIAL_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Configuration for [`Peer::networked`]: the listen port and peer set,
/// independent of however the caller chose to gather them (`aloft-admin`'s
/// `Cli`, a test fixture, ...).
pub struct NetworkPeerConfig {
    pub listen_port: u16,
    pub known_peer_addrs: Vec<SocketAddr>,
    pub worker_count: usize,
}

impl TryFrom<&aloft_admin::Cli> for NetworkPeerConfig {
    type Error = aloft_base::Error;

    fn try_from(cli: &aloft_admin::Cli) -> Result<Self> {
        cli.validate().map_err(err)?;
        let listen_port = cli.port.ok_or_else(|| err("networked peer requires --port"))?;
        Ok(NetworkPeerConfig {
            listen_port,
            known_peer_addrs: cli.known_peers.clone(),
            worker_count: cli.workers,
        })
    }
}

/// One running replica: the transaction engine every local thread talks to,
/// plus -- for a networked peer -- the connection engine and peer directory
/// that keep it replicating with the rest of the mesh.
pub struct Peer {
    peer_id: PeerId,
    engine: Arc<TransactionEngine>,
    directory: Arc<PeerDirectory>,
    conn_engine: Option<Arc<ConnectionEngine>>,
}

impl Peer {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn engine(&self) -> &Arc<TransactionEngine> {
        &self.engine
    }

    /// A peer with no network presence at all: every transaction commits
    /// locally and is broadcast into the void. Used for single-process
    /// demos and tests that don't need cross-peer replication.
    pub fn standalone(interpreter: Arc<dyn Interpreter>) -> Arc<Peer> {
        let peer_id = PeerId::new_random();
        let store = Arc::new(ObjectStore::new());
        let transport = Arc::new(NullTransport::new());
        let engine = Arc::new(TransactionEngine::new(peer_id, store, interpreter, transport));
        Arc::new(Peer {
            peer_id,
            engine,
            directory: Arc::new(PeerDirectory::new()),
            conn_engine: None,
        })
    }

    /// A peer that listens on `config.listen_port` and dials every address
    /// in `config.known_peer_addrs`, retrying unreachable ones in the
    /// background with capped exponential backoff rather than failing
    /// startup.
    pub fn networked(config: NetworkPeerConfig, interpreter: Arc<dyn Interpreter>) -> Result<Arc<Peer>> {
        let listen_addr: SocketAddr = format!("0.0.0.0:{}", config.listen_port)
            .parse()
            .map_err(|e| err(format!("invalid port {}: {e}", config.listen_port)))?;

        let peer_id = PeerId::new_random();
        let own_listen_addr = listen_addr.to_string();
        let store = Arc::new(ObjectStore::new());
        let transport = Arc::new(BroadcastTransport::new());
        let engine = Arc::new(TransactionEngine::new(peer_id, store, interpreter, transport.clone()));
        let directory = Arc::new(PeerDirectory::new());

        let accept_engine = engine.clone();
        let accept_directory = directory.clone();
        let accept_transport = transport.clone();
        let accept_own_addr = own_listen_addr.clone();
        let conn_engine = ConnectionEngine::new(
            Some(listen_addr),
            Some(Box::new(move |remote_addr: SocketAddr| {
                let handler = Arc::new(PeerConnectionHandler::new(
                    peer_id,
                    accept_own_addr.clone(),
                    accept_engine.clone(),
                    accept_directory.clone(),
                    remote_addr,
                ));
                accept_transport.register(&handler);
                handler as Arc<dyn ConnectionHandler>
            })),
        )?;
        conn_engine.start(config.worker_count);

        let peer = Arc::new(Peer {
            peer_id,
            engine,
            directory,
            conn_engine: Some(conn_engine),
        });

        for addr in config.known_peer_addrs {
            peer.clone().dial_with_retry(addr, own_listen_addr.clone(), transport.clone());
        }
        Ok(peer)
    }

    /// Attempts one dial; on failure, spawns a background thread that keeps
    /// retrying with capped exponential backoff rather than giving up. A
    /// known peer that never comes up simply never joins; it is never
    /// treated as a startup failure.
    fn dial_with_retry(self: Arc<Self>, addr: SocketAddr, own_listen_addr: String, transport: Arc<BroadcastTransport>) {
        if self.dial_once(addr, &own_listen_addr, &transport).is_ok() {
            return;
        }
        std::thread::spawn(move || {
            let mut backoff = DIAL_INITIAL_BACKOFF;
            loop {
                std::thread::sleep(backoff);
                if self.dial_once(addr, &own_listen_addr, &transport).is_ok() {
                    return;
                }
                backoff = (backoff * 2).min(DIAL_MAX_BACKOFF);
            }
        });
    }

    fn dial_once(&self, addr: SocketAddr, own_listen_addr: &str, transport: &Arc<BroadcastTransport>) -> Result<()> {
        let conn_engine = self
            .conn_engine
            .as_ref()
            .ok_or_else(|| err("standalone peer cannot dial"))?;
        let std_stream = StdTcpStream::connect_timeout(&addr, DIAL_CONNECT_TIMEOUT)
            .map_err(|e| err(format!("failed to dial {addr}: {e}")))?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| err(format!("failed to set {addr} non-blocking: {e}")))?;
        let stream = TcpStream::from_std(std_stream);

        let handler = Arc::new(PeerConnectionHandler::new(
            self.peer_id,
            own_listen_addr.to_string(),
            self.engine.clone(),
            self.directory.clone(),
            addr,
        ));
        transport.register(&handler);
        conn_engine.add_connection(stream, handler as Arc<dyn ConnectionHandler>)?;
        info!(target: "aloft", "dialed known peer {addr}");
        Ok(())
    }

    pub fn known_peer_count(&self) -> usize {
        self.directory.known_peers().len()
    }

    /// Drives a top-level method call on `object`, retrying on conflict
    /// until it commits. `linger` controls whether the peer keeps its
    /// connections open afterward (a long-lived worker peer) or is torn
    /// down immediately once the call completes.
    pub fn run_program(&self, object: &ObjectRef, method_name: &str, parameters: &[Value], linger: bool) -> Result<Value> {
        let result = loop {
            match self.engine.call_method(object, method_name, parameters)? {
                CallOutcome::Returned(value) => break value,
                CallOutcome::Conflict => {
                    std::thread::yield_now();
                    continue;
                }
            }
        };
        if !linger {
            self.stop();
        }
        Ok(result)
    }

    /// Orderly shutdown: stop accepting new connections and join the
    /// connection engine's threads. A no-op for a standalone peer.
    pub fn stop(&self) {
        if let Some(conn_engine) = &self.conn_engine {
            conn_engine.stop();
        }
        if self.known_peer_count() > 0 {
            warn!(target: "aloft", "peer {} stopping with {} peer(s) still in its directory", self.peer_id, self.known_peer_count());
        }
    }
}
