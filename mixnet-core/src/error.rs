//! Crate-wide error taxonomy.

use thiserror::Error;

/// Errors produced anywhere in the mixing core.
#[derive(Debug, Error)]
pub enum MixnetError {
    /// A ciphertext failed to decrypt, or its plaintext did not parse as a
    /// hop descriptor. The caller drops the message; it does not count
    /// toward the round.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A message arrived for a round this server has already released.
    #[error("stale round: {round} already released")]
    StaleRound { round: u64 },

    /// The entry mix already has `messages_per_round` distinct registrations.
    #[error("registration full")]
    RegistrationFull,

    /// The session configuration is invalid or unreadable. Fatal at startup.
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// An onward RPC to the next hop failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer has received `stop()` and is no longer accepting work.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MixnetError>;
