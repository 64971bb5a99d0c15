use aloft_net::Message;

/// How the transaction engine gets a committed `TransactionRecord` out to
/// the rest of the mesh. Implemented by the peer orchestrator, which knows
/// about live connections; this crate only needs to hand it messages.
pub trait Transport: Send + Sync {
    fn broadcast(&self, message: Message);
}

/// A transport that keeps every broadcast message in memory instead of
/// sending it anywhere. Used by standalone peers (no network configured)
/// and by tests that want to inspect what would have gone out.
#[derive(Default)]
pub struct NullTransport {
    sent: parking_lot::Mutex<Vec<Message>>,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

impl Transport for NullTransport {
    fn broadcast(&self, message: Message) {
        self.sent.lock().push(message);
    }
}
