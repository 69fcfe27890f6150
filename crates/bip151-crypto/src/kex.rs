//! Ephemeral secp256k1 key exchange.
//!
//! The handshake transmits bare 32-byte x coordinates, so every local
//! keypair is normalized to even y parity: when the compressed public key
//! would carry an 0x03 prefix, the private key is negated. The receiving
//! side can then always reconstruct the full point by prepending 0x02.

use rand::rngs::OsRng;
use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Number of bytes of public key material exchanged during the handshake.
pub const X_ONLY_LEN: usize = 32;

/// Compressed-point prefix for even y parity.
const EVEN_PARITY: u8 = 0x02;

/// Compressed-point prefix for odd y parity.
const ODD_PARITY: u8 = 0x03;

/// An ephemeral secp256k1 keypair with an even-parity public key.
///
/// Valid only for the duration of one handshake. [`Self::ecdh`] consumes
/// the keypair and erases the private key, so the secret cannot outlive
/// the exchange.
pub struct EphemeralKeypair {
    secret: SecretKey,
    x_only: [u8; X_ONLY_LEN],
}

impl EphemeralKeypair {
    /// Generate a fresh random keypair using the OS RNG.
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::new(&mut OsRng))
    }

    /// Build a keypair from a fixed 32-byte seed.
    ///
    /// Deterministic construction for tests with known keys; production
    /// code uses [`Self::generate`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] when the seed is not a valid
    /// secp256k1 scalar (zero or not below the curve order).
    pub fn from_seed(seed: [u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_slice(&seed)
            .map_err(|e| Error::KeyGeneration(format!("invalid seed: {e}")))?;
        Ok(Self::from_secret(secret))
    }

    /// Normalize to even parity and cache the x coordinate.
    fn from_secret(secret: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let mut secret = secret;
        let mut public = PublicKey::from_secret_key(&secp, &secret);
        if public.serialize()[0] == ODD_PARITY {
            // Negating the private key flips the public key's y parity,
            // leaving the x coordinate unchanged.
            secret = secret.negate();
            public = PublicKey::from_secret_key(&secp, &secret);
        }
        debug_assert_eq!(public.serialize()[0], EVEN_PARITY);

        let mut x_only = [0u8; X_ONLY_LEN];
        x_only.copy_from_slice(&public.serialize()[1..]);
        Self { secret, x_only }
    }

    /// The 32-byte x coordinate of the public key, as sent on the wire.
    pub fn x_only(&self) -> &[u8; X_ONLY_LEN] {
        &self.x_only
    }

    /// Compute the 32-byte ECDH secret with a peer's x-only public key.
    ///
    /// The peer's point is reconstructed with an even-parity prefix and
    /// validated as a full curve point; invalid input is rejected. Consumes
    /// the keypair and erases the private key afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] when the 32 bytes are not the x
    /// coordinate of a secp256k1 point.
    pub fn ecdh(mut self, peer_x_only: &[u8; X_ONLY_LEN]) -> Result<Zeroizing<[u8; 32]>> {
        let mut compressed = [0u8; 33];
        compressed[0] = EVEN_PARITY;
        compressed[1..].copy_from_slice(peer_x_only);

        let peer = PublicKey::from_slice(&compressed)
            .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;

        let shared = SharedSecret::new(&peer, &self.secret);
        self.secret.non_secure_erase();

        Ok(Zeroizing::new(shared.secret_bytes()))
    }
}

impl Drop for EphemeralKeypair {
    fn drop(&mut self) {
        // Covers the abandoned-handshake path; after a completed ECDH the
        // key has already been erased and this is a no-op.
        self.secret.non_secure_erase();
    }
}
