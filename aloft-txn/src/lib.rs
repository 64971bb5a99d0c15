mod engine;
mod transport;

pub use engine::TransactionEngine;
pub use transport::{NullTransport, Transport};
