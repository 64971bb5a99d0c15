use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one peer process for the lifetime of a session. Peers never
/// persist their id across restarts; a fresh one is minted at startup.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Reserved lower bookend, never assigned to a real peer. Used as a
    /// routing sentinel (e.g. "no peer").
    pub const MIN: PeerId = PeerId(Uuid::nil());
    /// Reserved upper bookend, never assigned to a real peer.
    pub const MAX: PeerId = PeerId(Uuid::max());

    pub fn new_random() -> Self {
        PeerId(Uuid::new_v4())
    }

    /// Two big-endian 64-bit words, matching the wire encoding of 128-bit
    /// ids described for the peer protocol.
    pub fn to_be_words(self) -> (u64, u64) {
        let bytes = self.0.as_bytes();
        let hi = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let lo = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
        (hi, lo)
    }

    pub fn from_be_words(hi: u64, lo: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&hi.to_be_bytes());
        bytes[8..16].copy_from_slice(&lo.to_be_bytes());
        PeerId(Uuid::from_bytes(bytes))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_ordered() {
        assert!(PeerId::MIN < PeerId::MAX);
    }

    #[test]
    fn word_round_trip() {
        let id = PeerId::new_random();
        let (hi, lo) = id.to_be_words();
        assert_eq!(PeerId::from_be_words(hi, lo), id);
    }
}
