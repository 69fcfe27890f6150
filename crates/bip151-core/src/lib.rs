//! Session state machine and packet framing for the encrypted transport.
//!
//! This crate implements the encrypted peer-to-peer message layer on top of
//! the primitives in `bip151-crypto`:
//! - Handshake driver (32-byte x-only ephemeral key exchange)
//! - Per-connection session keystate with volume/time rekey policy
//! - Packet codec (outbound encrypt, inbound authenticate-and-decrypt)
//! - Streaming inbound decoder for arbitrarily chunked network reads
//!
//! Socket I/O, peer management, and message dispatch past the command name
//! belong to the connection owner; this crate is strictly non-blocking and
//! performs no I/O of its own.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod error;
pub mod handshake;
pub mod session;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::TransportConfig;
pub use decoder::{InboundDecoder, RawMessage};
pub use error::{Error, Result};
pub use handshake::HandshakeDecoder;
pub use session::{Role, Session};
