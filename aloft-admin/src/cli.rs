use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration for one peer process. Every flag has a
/// network-peer reading except `--standalone`, which short-circuits all of
/// them: a standalone peer never binds a listener or dials anyone.
#[derive(Debug, Parser)]
#[command(name = "aloft", about = "Runs one floating-temple-style peer.")]
pub struct Cli {
    /// Peer listen port. Required unless `--standalone` is given.
    #[arg(long)]
    pub port: Option<u16>,

    /// Comma-separated addresses of peers to dial at startup.
    #[arg(long, value_delimiter = ',')]
    pub known_peers: Vec<SocketAddr>,

    /// Send/receive worker thread count.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Path to the program source for the embedded interpreter.
    #[arg(long)]
    pub program: Option<PathBuf>,

    /// Run with no network, purely in-process.
    #[arg(long)]
    pub standalone: bool,
}

impl Cli {
    /// Parses `ALOFT_IO_DEADLINE_SECS` from the environment: a per-connection
    /// debug I/O deadline. Unset or negative disables it.
    pub fn io_deadline_secs() -> Option<u64> {
        std::env::var("ALOFT_IO_DEADLINE_SECS")
            .ok()
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|secs| *secs >= 0)
            .map(|secs| secs as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("--workers must be positive".to_string());
        }
        if !self.standalone && self.port.is_none() {
            return Err("--port is required unless --standalone is given".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_does_not_require_a_port() {
        let cli = Cli::parse_from(["aloft", "--standalone"]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn network_peer_requires_a_port() {
        let cli = Cli::parse_from(["aloft"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let cli = Cli::parse_from(["aloft", "--standalone", "--workers", "0"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn known_peers_split_on_commas() {
        let cli = Cli::parse_from(["aloft", "--port", "9000", "--known-peers", "127.0.0.1:9001,127.0.0.1:9002"]);
        assert_eq!(cli.known_peers.len(), 2);
    }
}
