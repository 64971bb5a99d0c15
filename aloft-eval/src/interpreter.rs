use aloft_obj::{DeserializationContext, LocalObject};

/// Implemented by an embedded interpreter so the core can reconstruct a
/// local object that arrived from a remote peer.
pub trait Interpreter: Send + Sync {
    fn deserialize_object(
        &self,
        bytes: &[u8],
        ctx: &mut DeserializationContext,
    ) -> Box<dyn LocalObject>;
}
