use std::collections::HashMap;
use std::net::SocketAddr;

use aloft_base::PeerId;
use mio::Token;
use parking_lot::Mutex;

/// What the directory remembers about a handshaked connection: enough to
/// route outbound traffic to it and to recognize it again if the same peer
/// connects a second time.
#[derive(Clone, Copy, Debug)]
pub struct PeerHandle {
    pub token: Token,
    pub addr: SocketAddr,
}

/// Maps peer id to the connection that handshaked as that peer. Startup
/// dials every known peer id and also accepts dials; whichever handshake
/// completes first for a given peer id wins, and the directory tells the
/// caller to drop any later, duplicate connection for the same id.
#[derive(Default)]
pub struct PeerDirectory {
    by_peer: Mutex<HashMap<PeerId, PeerHandle>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to register `handle` as the connection for `peer_id`.
    /// Returns `true` if this is the first registration for that peer id
    /// and it was accepted; `false` if a connection for that peer was
    /// already registered, in which case the caller should close `handle`'s
    /// underlying connection as a duplicate.
    pub fn register(&self, peer_id: PeerId, handle: PeerHandle) -> bool {
        let mut by_peer = self.by_peer.lock();
        if by_peer.contains_key(&peer_id) {
            return false;
        }
        by_peer.insert(peer_id, handle);
        true
    }

    pub fn lookup(&self, peer_id: PeerId) -> Option<PeerHandle> {
        self.by_peer.lock().get(&peer_id).copied()
    }

    /// Drops routing state for a peer, e.g. after its connection resets.
    pub fn remove(&self, peer_id: PeerId) {
        self.by_peer.lock().remove(&peer_id);
    }

    pub fn known_peers(&self) -> Vec<PeerId> {
        self.by_peer.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(port: u16) -> PeerHandle {
        PeerHandle {
            token: Token(port as usize),
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
        }
    }

    #[test]
    fn first_handshake_wins() {
        let dir = PeerDirectory::new();
        let peer = PeerId::new_random();
        assert!(dir.register(peer, handle(1)));
        assert!(!dir.register(peer, handle(2)));
        assert_eq!(dir.lookup(peer).unwrap().token, Token(1));
    }
}
