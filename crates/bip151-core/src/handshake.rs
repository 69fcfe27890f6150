//! Pre-encryption handshake reader.
//!
//! Before encryption is active each side transmits exactly 32 bytes: the x
//! coordinate of its even-parity ephemeral public key, with no framing of
//! its own. [`HandshakeDecoder`] assembles those bytes from chunked reads
//! and checks that the peer did not instead start a legacy plaintext
//! conversation, which would indicate a downgrade or a confused peer.

use bip151_crypto::kex::X_ONLY_LEN;

use crate::decoder::{parse_command, COMMAND_SIZE};
use crate::{Error, Result};

/// Command name of the legacy version message.
const LEGACY_VERSION_COMMAND: &str = "version";

/// Offset of the command-name field inside a legacy plaintext header.
const LEGACY_COMMAND_OFFSET: usize = 4;

/// Accumulates the peer's 32-byte handshake key from chunked reads.
pub struct HandshakeDecoder {
    pos: usize,
    buffer: [u8; X_ONLY_LEN],
}

impl HandshakeDecoder {
    /// Create an empty handshake decoder.
    pub fn new() -> Self {
        Self {
            pos: 0,
            buffer: [0u8; X_ONLY_LEN],
        }
    }

    /// Consume bytes from `chunk`, returning how many were taken.
    ///
    /// Never fails and never consumes past the 32nd byte; surplus input
    /// belongs to the encrypted stream that follows.
    pub fn read(&mut self, chunk: &[u8]) -> usize {
        let remaining = X_ONLY_LEN - self.pos;
        let copy_bytes = remaining.min(chunk.len());
        self.buffer[self.pos..self.pos + copy_bytes].copy_from_slice(&chunk[..copy_bytes]);
        self.pos += copy_bytes;
        copy_bytes
    }

    /// True once all 32 bytes have arrived.
    pub fn complete(&self) -> bool {
        self.pos == X_ONLY_LEN
    }

    /// The assembled peer key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] before all 32 bytes have arrived.
    pub fn pubkey(&self) -> Result<&[u8; X_ONLY_LEN]> {
        if !self.complete() {
            return Err(Error::InvalidState("handshake key incomplete".into()));
        }
        Ok(&self.buffer)
    }

    /// Reject the handshake when the received bytes decode as a legacy
    /// plaintext message header.
    ///
    /// A legacy header starts with the network start-bytes followed by a
    /// 12-byte command name. Either the magic matching or the command
    /// parsing as `version` means the peer is speaking the unencrypted
    /// protocol, so the bytes cannot be an ephemeral key and the
    /// connection must be closed rather than confused into a downgrade.
    pub fn verify_not_legacy(&self, network_magic: &[u8; 4]) -> Result<()> {
        if !self.complete() {
            return Err(Error::InvalidState("handshake key incomplete".into()));
        }
        if &self.buffer[..4] == network_magic {
            return Err(Error::BadHandshake(
                "received legacy network magic instead of a handshake key".into(),
            ));
        }
        let command_field =
            &self.buffer[LEGACY_COMMAND_OFFSET..LEGACY_COMMAND_OFFSET + COMMAND_SIZE];
        if let Ok(command) = parse_command(command_field) {
            if command == LEGACY_VERSION_COMMAND {
                return Err(Error::BadHandshake(
                    "received legacy version message instead of a handshake key".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for HandshakeDecoder {
    fn default() -> Self {
        Self::new()
    }
}
