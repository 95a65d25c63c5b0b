//! Peer identity: a static X25519 key pair plus the on-disk publication of
//! its public half.
//!
//! Keys are ephemeral for the lifetime of one session. `PeerIdentity::load_or_generate`
//! always generates fresh material and publishes it; `drop_public_key_file`
//! removes the published file on shutdown so a restarted peer cannot be
//! mistaken for the same session by an observer of the filesystem.

mod keypair;

pub use keypair::PeerIdentity;
