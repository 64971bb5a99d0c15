//! The peer orchestrator: wires the wire protocol (`aloft-net`) to the
//! transaction engine (`aloft-txn`), so that a `TransactionRecord` that
//! arrives on any connection reaches `TransactionEngine::apply_transaction_record`
//! and every locally committed one goes out to every live connection.
//!
//! A [`Peer`] is either standalone (no listener, no dialing, a `NullTransport`
//! that goes nowhere) or networked (binds a port, dials its configured known
//! peers, and replicates over a broadcast [`Transport`]).

mod handler;
mod peer;
mod transport;

pub use handler::PeerConnectionHandler;
pub use peer::{NetworkPeerConfig, Peer};
pub use transport::BroadcastTransport;
