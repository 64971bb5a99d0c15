use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use mio::Token;
use parking_lot::Mutex;
use tracing::warn;

use aloft_base::PeerId;
use aloft_net::{ConnectionEngine, ConnectionHandler, Message, PeerDirectory, PeerHandle};
use aloft_txn::TransactionEngine;

/// Feeds one connection's inbound `Message`s into the transaction engine
/// and drains its own outbound queue (filled by [`crate::BroadcastTransport`]
/// and by replies to `ObjectRequest`). The very first outbound message on
/// every connection, dialed or accepted, is a `Hello`: that is how both
/// sides learn the other's peer id without a separate handshake message.
pub struct PeerConnectionHandler {
    own_peer_id: PeerId,
    own_listen_addr: String,
    engine: Arc<TransactionEngine>,
    directory: Arc<PeerDirectory>,
    remote_addr: SocketAddr,
    outbound: Arc<Mutex<VecDeque<Message>>>,
    hello_sent: AtomicBool,
    token: Mutex<Option<Token>>,
    conn_engine: Mutex<Option<Weak<ConnectionEngine>>>,
    remote_peer_id: Mutex<Option<PeerId>>,
}

impl PeerConnectionHandler {
    pub fn new(
        own_peer_id: PeerId,
        own_listen_addr: String,
        engine: Arc<TransactionEngine>,
        directory: Arc<PeerDirectory>,
        remote_addr: SocketAddr,
    ) -> Self {
        PeerConnectionHandler {
            own_peer_id,
            own_listen_addr,
            engine,
            directory,
            remote_addr,
            outbound: Arc::new(Mutex::new(VecDeque::new())),
            hello_sent: AtomicBool::new(false),
            token: Mutex::new(None),
            conn_engine: Mutex::new(None),
            remote_peer_id: Mutex::new(None),
        }
    }

    /// Queues `message` for this connection and, if it has gone idle,
    /// re-readies it -- otherwise a commit broadcast or an `ObjectRequest`
    /// reply queued outside of `service()` would sit unsent until unrelated
    /// inbound bytes happened to re-ready the socket.
    pub fn push_outbound(&self, message: Message) {
        self.outbound.lock().push_back(message);
        self.wake();
    }

    fn wake(&self) {
        let engine = self.conn_engine.lock().clone();
        let token = *self.token.lock();
        if let (Some(engine), Some(token)) = (engine, token) {
            if let Some(engine) = engine.upgrade() {
                engine.notify_outbound(token);
            }
        }
    }

    fn try_register(&self) {
        let Some(peer_id) = *self.remote_peer_id.lock() else {
            return;
        };
        let Some(token) = *self.token.lock() else {
            return;
        };
        let handle = PeerHandle { token, addr: self.remote_addr };
        if !self.directory.register(peer_id, handle) {
            warn!(target: "aloft", "duplicate connection for peer {peer_id}, keeping the earlier one");
        }
    }
}

impl ConnectionHandler for PeerConnectionHandler {
    fn next_outbound(&self) -> Option<Message> {
        if !self.hello_sent.swap(true, Ordering::SeqCst) {
            return Some(Message::Hello {
                peer_id: self.own_peer_id,
                listen_addr: self.own_listen_addr.clone(),
            });
        }
        self.outbound.lock().pop_front()
    }

    fn on_message(&self, message: Message) {
        match message {
            Message::Hello { peer_id, .. } => {
                *self.remote_peer_id.lock() = Some(peer_id);
                self.try_register();
            }
            Message::TransactionRecord { tid, peer_id, writes, versions } => {
                if let Err(e) = self.engine.apply_transaction_record(tid, peer_id, writes, versions) {
                    warn!(target: "aloft", "failed to apply transaction record {tid}: {e:?}");
                }
            }
            Message::ObjectRequest { object_id } => match self.engine.serialize_head(object_id) {
                Ok(version) => self.push_outbound(Message::ObjectResponse { version }),
                Err(e) => warn!(target: "aloft", "can't satisfy object request for {object_id}: {e:?}"),
            },
            Message::ObjectResponse { version } => {
                if let Err(e) = self.engine.receive_object_response(version) {
                    warn!(target: "aloft", "failed to install object response: {e:?}");
                }
            }
            Message::Bye => {}
        }
    }

    fn on_registered(&self, engine: Weak<ConnectionEngine>, token: Token) {
        *self.token.lock() = Some(token);
        *self.conn_engine.lock() = Some(engine);
        self.try_register();
    }

    fn on_close(&self) {
        if let Some(peer_id) = *self.remote_peer_id.lock() {
            self.directory.remove(peer_id);
        }
    }
}
