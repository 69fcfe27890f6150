//! Cryptographic primitives for the BIP151 encrypted transport.
//!
//! This crate implements the cryptographic foundations of the encrypted
//! peer-to-peer message layer:
//! - Packet encryption (two-key ChaCha20-Poly1305 with an encrypted length field)
//! - Key derivation (HKDF-SHA256-L32 session schedule, double-SHA-256 rekeying)
//! - Key exchange (ephemeral secp256k1 with even-parity x-only public keys)
//!
//! Security requirements:
//! - No unsafe code
//! - All secrets use `Zeroizing` wrappers
//! - No logging of key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod kex;

pub use aead::{PacketCipher, AAD_LEN, TAG_LEN};
pub use error::{Error, Result};
