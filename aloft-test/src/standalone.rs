use std::sync::Arc;

use aloft::Peer;
use aloft_eval::Interpreter;
use aloft_lang::LangInterpreter;

/// A single in-process peer with no network presence: for tests that only
/// need the transaction engine and object store, not cross-peer
/// replication.
pub struct StandaloneFixture {
    pub peer: Arc<Peer>,
}

impl StandaloneFixture {
    pub fn new() -> Self {
        let interpreter: Arc<dyn Interpreter> = Arc::new(LangInterpreter::new());
        StandaloneFixture { peer: Peer::standalone(interpreter) }
    }
}

impl Default for StandaloneFixture {
    fn default() -> Self {
        Self::new()
    }
}
