mod error;
mod object_id;
mod peer_id;
mod transaction_id;

pub use error::{err, Error, Result};
pub use object_id::ObjectId;
pub use peer_id::PeerId;
pub use transaction_id::TransactionId;
