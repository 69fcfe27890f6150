//! Error types for transport operations.
//!
//! Every error here is fatal for the connection: the transport performs no
//! in-layer retries, and the connection owner is expected to discard the
//! session on any failure.

use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Transport operation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Length recovery failed or the recovered size exceeds the limit.
    #[error("Malformed packet header: {0}")]
    MalformedHeader(String),

    /// AEAD tag verification failed on an inbound packet.
    #[error("Packet authentication failed")]
    AuthFailure,

    /// The peer exceeded the byte or time abort limits.
    #[error("Protocol abuse: {0}")]
    ProtocolAbuse(String),

    /// A peer-requested rekey arrived below the minimum rekey interval.
    #[error("Rekey refused: minimum rekey interval not elapsed")]
    RekeyRefused,

    /// The peer's handshake bytes are not a valid key, or decode as a
    /// legacy plaintext message header.
    #[error("Bad handshake: {0}")]
    BadHandshake(String),

    /// The decrypted payload does not start with a parseable command name.
    #[error("Bad payload: {0}")]
    BadPayload(String),

    /// An operation was invoked in a state that does not permit it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Cryptographic primitive failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] bip151_crypto::Error),
}
