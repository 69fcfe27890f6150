//! Packet codec: whole-frame encrypt and authenticate-and-decrypt.
//!
//! An outbound buffer is `length(3, LE, bit 23 clear) || plaintext`; the
//! codec turns it in place into `enc_length || ciphertext || tag`. Inbound,
//! the reverse: a complete wire frame is replaced by its plaintext payload.
//! The rekey flag rides in bit 23 of the length field and is owned entirely
//! by the codec on the send side.

use tracing::warn;
use zeroize::Zeroize;

use bip151_crypto::aead::{AAD_LEN, TAG_LEN};

use crate::session::{Session, SessionState};
use crate::{Error, Result};

/// Bit 23 of the recovered length value: the sender rekeys after this
/// packet, and the receiver must follow suit.
pub const REKEY_FLAG_BIT: u32 = 1 << 23;

/// Byte and mask carrying the flag inside the little-endian length field.
const FLAG_BYTE: usize = 2;
const FLAG_MASK: u8 = 1 << 7;

/// Prefix `payload` with its 3-byte little-endian length field, producing
/// a buffer ready for [`Session::encrypt_packet`].
///
/// # Errors
///
/// Returns [`Error::InvalidState`] when the payload cannot be encoded in
/// the 23 usable bits of the length field.
pub fn with_length_header(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() >= REKEY_FLAG_BIT as usize {
        return Err(Error::InvalidState(
            "payload too large for 23-bit length field".into(),
        ));
    }
    let len = (payload.len() as u32).to_le_bytes();
    let mut buf = Vec::with_capacity(AAD_LEN + payload.len());
    buf.extend_from_slice(&len[..AAD_LEN]);
    buf.extend_from_slice(payload);
    Ok(buf)
}

impl Session {
    /// Encrypt one outbound frame in place.
    ///
    /// `buf` must hold the 3-byte length field followed by the plaintext
    /// payload, with bit 23 of the length clear (it is reserved for the
    /// rekey flag). When the send-side rekey policy fires, the flag is set
    /// before encryption and the keypack rotated after it, so the peer
    /// decrypts this frame under the old key and everything after it under
    /// the new one.
    pub fn encrypt_packet(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        if self.state() != SessionState::Encrypted {
            return Err(Error::InvalidState("encrypt before handshake completion".into()));
        }
        if buf.len() < AAD_LEN {
            return Err(Error::InvalidState("outbound buffer missing length field".into()));
        }
        if buf[FLAG_BYTE] & FLAG_MASK != 0 {
            // Lengths are only allowed up to 2^23; the top bit belongs to
            // the transport.
            return Err(Error::InvalidState("reserved length bit set by caller".into()));
        }

        let should_rekey = self.should_rekey_send();
        if should_rekey {
            buf[FLAG_BYTE] |= FLAG_MASK;
        }

        let header = [buf[0], buf[1], buf[2]];
        let payload_len = buf.len() - AAD_LEN;
        let cipher = self
            .send_cipher
            .as_ref()
            .ok_or_else(|| Error::InvalidState("send cipher not installed".into()))?;
        let packet = cipher.seal(self.send_seq, header, &buf[AAD_LEN..])?;

        self.send_seq += 1;
        self.bytes_encrypted += payload_len as u64;
        *buf = packet;

        if should_rekey {
            // Rotate after the flagged frame so it still used the old key.
            self.rekey(true)?;
        }
        Ok(())
    }

    /// Authenticate and decrypt one complete inbound frame in place.
    ///
    /// `buf` must hold `enc_length || ciphertext || tag`. On success it is
    /// replaced by the plaintext payload. On tag mismatch the buffer is
    /// zeroized, the session aborted, and [`Error::AuthFailure`] returned.
    /// The receive sequence number advances per attempt, never per success:
    /// a failed decrypt kills the connection, so the counter stays in step
    /// on every surviving one.
    pub fn decrypt_packet(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        if self.state() != SessionState::Encrypted {
            return Err(Error::InvalidState("decrypt before handshake completion".into()));
        }
        if buf.len() < AAD_LEN + TAG_LEN {
            return Err(Error::MalformedHeader("frame too short".into()));
        }
        if let Err(e) = self.check_abuse_limits(buf.len()) {
            self.abort();
            return Err(e);
        }

        let seq = self.recv_seq;
        self.recv_seq += 1;

        let cipher = self
            .recv_cipher
            .as_ref()
            .ok_or_else(|| Error::InvalidState("recv cipher not installed".into()))?;
        match cipher.open(seq, buf) {
            Ok(plaintext) => {
                self.bytes_decrypted += plaintext.len() as u64;
                *buf = plaintext.to_vec();
                Ok(())
            }
            Err(_) => {
                warn!("packet authentication failed");
                buf.zeroize();
                self.abort();
                Err(Error::AuthFailure)
            }
        }
    }

    /// Recover the raw 24-bit length value (rekey flag still embedded) from
    /// the first [`AAD_LEN`] bytes of an incoming frame.
    ///
    /// Uses the current receive sequence number without advancing it, so a
    /// partially received frame can be sized before its body arrives.
    pub(crate) fn recover_length(&self, aad: &[u8]) -> Result<u32> {
        if self.state() != SessionState::Encrypted {
            return Err(Error::InvalidState("length recovery before handshake".into()));
        }
        let cipher = self
            .recv_cipher
            .as_ref()
            .ok_or_else(|| Error::InvalidState("recv cipher not installed".into()))?;
        cipher
            .decrypt_length(self.recv_seq, aad)
            .map_err(|_| Error::MalformedHeader("length recovery failed".into()))
    }
}
