//! Streaming decoder for inbound encrypted frames.
//!
//! The network hands the transport arbitrarily sized chunks. The decoder
//! accumulates them through a two-phase state machine: first the 3-byte
//! length field, whose cleartext value is recovered speculatively from the
//! receive cipher, then the payload plus tag. A completed frame is
//! authenticated, decrypted, and split into a command name and payload; a
//! peer-signalled rekey (bit 23 of the length) is applied after the
//! decrypt. The decoder then resets for the next frame on the same
//! session.
//!
//! Every failure is fatal: the caller must drop the connection.

use tracing::{debug, warn};
use zeroize::Zeroize;

use bip151_crypto::aead::{AAD_LEN, TAG_LEN};

use crate::codec::REKEY_FLAG_BIT;
use crate::config::MAX_MESSAGE_SIZE;
use crate::session::Session;
use crate::{Error, Result};

/// Fixed width of the command-name field at the head of every plaintext.
pub const COMMAND_SIZE: usize = 12;

/// Grow the receive buffer at most this far ahead of the data received.
const BUFFER_GROWTH_STEP: usize = 256 * 1024;

/// A decrypted inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Command name parsed from the plaintext head.
    pub command: String,
    /// Serialized payload following the command-name field.
    pub payload: Vec<u8>,
}

/// Stateful reader assembling encrypted frames from chunked input.
///
/// One decoder serves one session. [`Self::read`] consumes at most
/// `chunk.len()` bytes and may need several calls per frame; callers loop
/// until the whole chunk is consumed, draining completed messages with
/// [`Self::take_message`] as they appear.
pub struct InboundDecoder {
    /// False while reading the length field, true while reading body + tag.
    in_data: bool,
    hdr_pos: usize,
    data_pos: usize,
    message_size: u32,
    rekey_flag: bool,
    buffer: Vec<u8>,
    message: Option<RawMessage>,
}

impl InboundDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            in_data: false,
            hdr_pos: 0,
            data_pos: 0,
            message_size: 0,
            rekey_flag: false,
            buffer: vec![0u8; AAD_LEN],
            message: None,
        }
    }

    /// Consume bytes from `chunk`, returning how many were taken.
    ///
    /// Returns 0 without consuming anything while a completed message is
    /// waiting to be drained. Any error is fatal for the connection.
    pub fn read(&mut self, session: &mut Session, chunk: &[u8]) -> Result<usize> {
        if self.message.is_some() {
            return Ok(0);
        }
        if !self.in_data {
            self.read_header(session, chunk)
        } else {
            self.read_data(session, chunk)
        }
    }

    /// True when a decrypted message is ready to be taken.
    pub fn complete(&self) -> bool {
        self.message.is_some()
    }

    /// Drain the completed message, readying the decoder for the next frame.
    pub fn take_message(&mut self) -> Option<RawMessage> {
        self.message.take()
    }

    /// Phase one: accumulate the length field and size the frame.
    fn read_header(&mut self, session: &mut Session, chunk: &[u8]) -> Result<usize> {
        let remaining = AAD_LEN - self.hdr_pos;
        let copy_bytes = remaining.min(chunk.len());
        self.buffer[self.hdr_pos..self.hdr_pos + copy_bytes]
            .copy_from_slice(&chunk[..copy_bytes]);
        self.hdr_pos += copy_bytes;

        if self.hdr_pos < AAD_LEN {
            return Ok(copy_bytes);
        }

        let raw = session.recover_length(&self.buffer[..AAD_LEN])?;

        // The counterparty signals a post-this-message rekey by setting the
        // most significant bit of the length.
        self.rekey_flag = raw & REKEY_FLAG_BIT != 0;
        if self.rekey_flag {
            debug!(raw, "rekey flag detected");
        }
        let message_size = raw & !REKEY_FLAG_BIT;

        if message_size > MAX_MESSAGE_SIZE {
            warn!(message_size, "maximum message size exceeded");
            return Err(Error::MalformedHeader(format!(
                "message size {message_size} exceeds maximum"
            )));
        }

        self.message_size = message_size;
        self.in_data = true;
        Ok(copy_bytes)
    }

    /// Phase two: accumulate payload + tag, then finish the frame.
    fn read_data(&mut self, session: &mut Session, chunk: &[u8]) -> Result<usize> {
        let total = self.message_size as usize + TAG_LEN;
        let remaining = total - self.data_pos;
        let copy_bytes = remaining.min(chunk.len());

        // Grow in bounded steps, never beyond the full frame.
        let needed = AAD_LEN + self.data_pos + copy_bytes;
        if self.buffer.len() < needed {
            let target = (needed + BUFFER_GROWTH_STEP + TAG_LEN).min(AAD_LEN + total);
            self.buffer.resize(target, 0);
        }

        self.buffer[AAD_LEN + self.data_pos..AAD_LEN + self.data_pos + copy_bytes]
            .copy_from_slice(&chunk[..copy_bytes]);
        self.data_pos += copy_bytes;

        if self.data_pos == total {
            self.finish_frame(session)?;
        }
        Ok(copy_bytes)
    }

    /// Decrypt the assembled frame, parse it, and apply a signalled rekey.
    fn finish_frame(&mut self, session: &mut Session) -> Result<()> {
        let mut frame = std::mem::take(&mut self.buffer);
        frame.truncate(AAD_LEN + self.message_size as usize + TAG_LEN);

        // Zeroizes the buffer itself on failure.
        session.decrypt_packet(&mut frame)?;

        let command = match parse_command(&frame) {
            Ok(command) => command,
            Err(e) => {
                frame.zeroize();
                return Err(e);
            }
        };

        if self.rekey_flag {
            // Post-decrypt rekey; refusal (DoS limit) is fatal.
            if let Err(e) = session.rekey(false) {
                frame.zeroize();
                return Err(e);
            }
        }

        let payload = frame.split_off(COMMAND_SIZE);
        frame.zeroize();

        self.message = Some(RawMessage { command, payload });
        self.reset();
        Ok(())
    }

    /// Rearm for the next frame.
    fn reset(&mut self) {
        self.in_data = false;
        self.hdr_pos = 0;
        self.data_pos = 0;
        self.message_size = 0;
        self.rekey_flag = false;
        self.buffer = vec![0u8; AAD_LEN];
    }
}

impl Default for InboundDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the fixed-width NUL-padded ASCII command name at the head of a
/// decrypted payload.
///
/// The field is [`COMMAND_SIZE`] bytes: printable ASCII characters
/// followed by NUL padding. An empty name, a non-printable character, or a
/// non-NUL byte after the padding began all reject the message.
pub(crate) fn parse_command(plaintext: &[u8]) -> Result<String> {
    if plaintext.len() < COMMAND_SIZE {
        return Err(Error::BadPayload("truncated command name field".into()));
    }
    let field = &plaintext[..COMMAND_SIZE];
    let name_len = field.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
    if name_len == 0 {
        return Err(Error::BadPayload("empty command name".into()));
    }
    if field[name_len..].iter().any(|&b| b != 0) {
        return Err(Error::BadPayload("command name has non-zero padding".into()));
    }
    let name = &field[..name_len];
    if name.iter().any(|&b| !(0x20..=0x7E).contains(&b)) {
        return Err(Error::BadPayload("command name is not printable ASCII".into()));
    }
    String::from_utf8(name.to_vec())
        .map_err(|_| Error::BadPayload("command name is not valid ASCII".into()))
}
