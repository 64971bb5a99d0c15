use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace used to derive deterministic ids for named shared objects, so
/// that two peers creating an object under the same name agree on its id
/// without talking to each other first.
const NAMED_OBJECT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6e, 0x2c, 0x43, 0xb1, 0x0a, 0x1d, 0x4f, 0x9a, 0xb1, 0x0e, 0x2f, 0x4d, 0x8a, 0x77, 0x3c, 0x05,
]);

/// Identifies one shared object for the lifetime of the peer(s) that know
/// about it. Anonymous objects get a random id; named objects derive their
/// id from their name so that every peer which creates an object of that
/// name converges on the same id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn new_anonymous() -> Self {
        ObjectId(Uuid::new_v4())
    }

    pub fn for_name(name: &str) -> Self {
        ObjectId(Uuid::new_v5(&NAMED_OBJECT_NAMESPACE, name.as_bytes()))
    }

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
        ObjectId(Uuid::from_bytes(bytes))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_id() {
        assert_eq!(ObjectId::for_name("shared"), ObjectId::for_name("shared"));
    }

    #[test]
    fn different_name_different_id() {
        assert_ne!(ObjectId::for_name("a"), ObjectId::for_name("b"));
    }

    #[test]
    fn anonymous_ids_are_unique() {
        assert_ne!(ObjectId::new_anonymous(), ObjectId::new_anonymous());
    }
}
