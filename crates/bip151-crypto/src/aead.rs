//! Packet encryption for the post-handshake wire format.
//!
//! Each direction of a connection is parameterized by a 64-byte keypack:
//! the first 32 bytes key a ChaCha20 stream cipher that conceals the 3-byte
//! length field, the second 32 bytes key the ChaCha20-Poly1305 instance
//! (RFC 8439) that encrypts the payload. The encrypted length field is fed
//! to the AEAD as associated data, so the Poly1305 tag covers it.
//!
//! On the wire a packet is `enc_length(3) || ciphertext || tag(16)`. The
//! length field can be recovered from the first three bytes alone, which
//! lets a streaming reader learn how many bytes to expect before the rest
//! of the packet has arrived.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key as StreamKey, Nonce as StreamNonce};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Number of bytes in the length field (associated data) of a packet.
pub const AAD_LEN: usize = 3;

/// Number of bytes in the Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;

/// Number of bytes in a directional keypack.
pub const KEYPACK_LEN: usize = 64;

/// Construct an AEAD nonce from a packet sequence number.
///
/// Both the length cipher and the payload cipher require 12-byte nonces:
/// - `nonce[0:4] = 0x00000000` (4 bytes of zeros, fixed)
/// - `nonce[4:12] = seq` (8 bytes, little-endian)
///
/// The sequence number is per-direction and reset only together with a
/// keypack replacement, so a (key, nonce) pair is never reused.
pub fn construct_nonce(seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    // nonce[0:4] already zero
    nonce[4..12].copy_from_slice(&seq.to_le_bytes());
    nonce
}

/// One direction's packet cipher, bound to a 64-byte keypack.
///
/// The caller owns the sequence number; every method takes it explicitly so
/// that length recovery can be retried for a partially received packet
/// without advancing any state.
pub struct PacketCipher {
    /// Key for the length stream cipher (first keypack half).
    length_key: Zeroizing<[u8; 32]>,
    /// AEAD instance for the payload (second keypack half).
    payload_cipher: ChaCha20Poly1305,
}

impl PacketCipher {
    /// Install a 64-byte keypack: `length_key(32) || payload_key(32)`.
    pub fn new(keypack: &[u8; KEYPACK_LEN]) -> Self {
        let mut length_key = Zeroizing::new([0u8; 32]);
        length_key.copy_from_slice(&keypack[..32]);
        let payload_cipher = ChaCha20Poly1305::new(Key::from_slice(&keypack[32..]));
        Self {
            length_key,
            payload_cipher,
        }
    }

    /// Replace the keypack in place. Used on rekey.
    pub fn rekey(&mut self, keypack: &[u8; KEYPACK_LEN]) {
        self.length_key.copy_from_slice(&keypack[..32]);
        self.payload_cipher = ChaCha20Poly1305::new(Key::from_slice(&keypack[32..]));
    }

    /// XOR the 3-byte length field with the keystream for `seq`.
    ///
    /// The operation is involutive: applying it to a cleartext length
    /// conceals it, applying it to a concealed length recovers it. It does
    /// not mutate cipher state, so a receiver may call it speculatively.
    pub fn crypt_length(&self, seq: u64, header: &mut [u8; AAD_LEN]) {
        let nonce = construct_nonce(seq);
        let mut cipher = ChaCha20::new(
            StreamKey::from_slice(&self.length_key[..]),
            StreamNonce::from_slice(&nonce),
        );
        cipher.apply_keystream(header);
    }

    /// Recover the cleartext 24-bit little-endian length value from the
    /// first [`AAD_LEN`] bytes of a packet.
    ///
    /// The returned value still carries bit 23 (the rekey flag); masking it
    /// is the caller's responsibility.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLength`] when fewer than [`AAD_LEN`] bytes
    /// are supplied.
    pub fn decrypt_length(&self, seq: u64, aad: &[u8]) -> Result<u32> {
        if aad.len() < AAD_LEN {
            return Err(Error::InvalidLength {
                expected: AAD_LEN,
                actual: aad.len(),
            });
        }
        let mut header = [0u8; AAD_LEN];
        header.copy_from_slice(&aad[..AAD_LEN]);
        self.crypt_length(seq, &mut header);
        Ok(u32::from_le_bytes([header[0], header[1], header[2], 0]))
    }

    /// Encrypt one packet.
    ///
    /// `header` is the cleartext 3-byte little-endian length field
    /// (including any flag bit already set by the caller); `plaintext` is
    /// the payload. Returns `enc_header || ciphertext || tag`.
    pub fn seal(&self, seq: u64, header: [u8; AAD_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut enc_header = header;
        self.crypt_length(seq, &mut enc_header);

        let nonce = construct_nonce(seq);
        let ciphertext = self
            .payload_cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &enc_header,
                },
            )
            .map_err(|_| Error::Encryption("ChaCha20-Poly1305 encryption failed".into()))?;

        let mut out = Vec::with_capacity(AAD_LEN + ciphertext.len());
        out.extend_from_slice(&enc_header);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Authenticate and decrypt one packet of layout
    /// `enc_header || ciphertext || tag`.
    ///
    /// Returns the plaintext payload wrapped in `Zeroizing`. The tag covers
    /// the encrypted length field, so a tampered length fails here even
    /// though it was already used to size the read.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLength`] when the packet is too short to contain a
    /// header and tag; [`Error::Decryption`] on tag mismatch.
    pub fn open(&self, seq: u64, packet: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if packet.len() < AAD_LEN + TAG_LEN {
            return Err(Error::InvalidLength {
                expected: AAD_LEN + TAG_LEN,
                actual: packet.len(),
            });
        }
        let (aad, ciphertext) = packet.split_at(AAD_LEN);

        let nonce = construct_nonce(seq);
        let plaintext = self
            .payload_cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| Error::Decryption("ChaCha20-Poly1305 authentication failed".into()))?;

        Ok(Zeroizing::new(plaintext))
    }
}
