use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aloft::{NetworkPeerConfig, Peer};
use aloft_eval::Interpreter;
use aloft_lang::LangInterpreter;

/// `count` in-process peers wired together over loopback TCP, each dialing
/// every other one at startup. For tests that exercise actual cross-peer
/// replication, not just the engine in isolation.
pub struct NetworkFixture {
    pub peers: Vec<Arc<Peer>>,
}

impl NetworkFixture {
    pub fn new(count: usize) -> Self {
        let addrs: Vec<SocketAddr> = (0..count).map(|_| reserve_loopback_addr()).collect();
        let peers = addrs
            .iter()
            .enumerate()
            .map(|(i, addr)| {
                let known_peer_addrs = addrs
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, a)| *a)
                    .collect();
                let config = NetworkPeerConfig {
                    listen_port: addr.port(),
                    known_peer_addrs,
                    worker_count: 2,
                };
                let interpreter: Arc<dyn Interpreter> = Arc::new(LangInterpreter::new());
                Peer::networked(config, interpreter).expect("failed to start a networked test peer")
            })
            .collect();
        let fixture = NetworkFixture { peers };
        fixture.wait_for_full_mesh(Duration::from_secs(5));
        fixture
    }

    /// Blocks until every peer's directory has registered every other
    /// peer, or `timeout` elapses. Handshakes are asynchronous (the first
    /// outbound message on a dial, not part of connecting), so tests that
    /// need the mesh up before proceeding should call this first.
    pub fn wait_for_full_mesh(&self, timeout: Duration) {
        let expected = self.peers.len().saturating_sub(1);
        self.wait_until(timeout, || self.peers.iter().all(|p| p.known_peer_count() == expected));
    }

    /// Replication has no commit acknowledgment: a test asserting on
    /// post-propagation state polls `condition` until it holds or
    /// `timeout` elapses, returning whether it ever did.
    pub fn wait_until(&self, timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return condition();
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

fn reserve_loopback_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to reserve a loopback port");
    let addr = listener.local_addr().expect("bound listener has a local addr");
    drop(listener);
    addr
}
