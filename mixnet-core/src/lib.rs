//! Core mixing logic for a synchronous-round mix network.
//!
//! This crate implements the pieces that do not depend on a transport:
//! sealed-box crypto, onion construction and peeling, the per-server round
//! barrier, and the client lifecycle/emission loop. A binary wires these to
//! gRPC (see the `mixnet-api` and `mixnet-cli` crates in this workspace).

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod logging;
pub mod onion;
pub mod server;
pub mod shutdown;
pub mod tracing;

pub use error::{MixnetError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = logging::LogLevel::Info;
    }
}
