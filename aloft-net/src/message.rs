use aloft_base::{ObjectId, PeerId, TransactionId};
use serde::{Deserialize, Serialize};

/// A committed version of one object, as shipped alongside a
/// `TransactionRecord` or in reply to an `ObjectRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedVersion {
    pub object_id: ObjectId,
    pub tid: TransactionId,
    pub bytes: Vec<u8>,
    /// Ids of the objects this version transitively embeds, in the order
    /// the serializer assigned them indexes.
    pub embedded_object_ids: Vec<ObjectId>,
}

/// The structured payload carried inside a framed wire message. Framing
/// itself (§ `frame.rs`) is opaque to this type's encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// First message on a new connection: exchanges peer identity and the
    /// sender's own listen address so the recipient can dial back.
    Hello { peer_id: PeerId, listen_addr: String },
    /// Announces a committed transaction and delivers the serialized
    /// versions of every object it touched.
    TransactionRecord {
        tid: TransactionId,
        peer_id: PeerId,
        writes: Vec<ObjectId>,
        versions: Vec<SerializedVersion>,
    },
    /// Asks a peer for the current head version of an object by id.
    ObjectRequest { object_id: ObjectId },
    /// Delivers the requested head version.
    ObjectResponse { version: SerializedVersion },
    /// Clean shutdown notice.
    Bye,
}
