use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use aloft_net::Message;
use aloft_txn::Transport;

use crate::handler::PeerConnectionHandler;

/// Replicates every committed transaction to every connection this peer
/// currently has open, networked or dialed. Grounded in the "always full
/// replication, no partial membership" simplification: there is no
/// partial-subscription routing, every connection gets everything.
///
/// Holds only weak references to each connection's handler, so a closed
/// connection is silently dropped from the broadcast set the next time a
/// commit goes out rather than needing an explicit unregister. Broadcasting
/// goes through the handler's own `push_outbound`, not the queue directly,
/// so the connection is re-readied immediately instead of sitting queued
/// until unrelated inbound bytes happen to wake it.
#[derive(Default)]
pub struct BroadcastTransport {
    handlers: Mutex<Vec<Weak<PeerConnectionHandler>>>,
}

impl BroadcastTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: &Arc<PeerConnectionHandler>) {
        self.handlers.lock().push(Arc::downgrade(handler));
    }
}

impl Transport for BroadcastTransport {
    fn broadcast(&self, message: Message) {
        self.handlers.lock().retain(|weak| match weak.upgrade() {
            Some(handler) => {
                handler.push_outbound(message.clone());
                true
            }
            None => false,
        });
    }
}
