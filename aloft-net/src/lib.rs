mod conn;
mod directory;
mod frame;
mod message;
mod varint;

pub use conn::{ConnectionEngine, ConnectionHandler};
pub use directory::{PeerDirectory, PeerHandle};
pub use frame::{encode_frame, parse_frame, ParseFrameResult};
pub use message::{Message, SerializedVersion};
pub use varint::{encode_varint, parse_varint, varint_len, ParseVarintResult, MAX_VARINT_LENGTH};
