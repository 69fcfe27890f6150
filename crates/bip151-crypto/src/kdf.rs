//! Key derivation for the encrypted transport.
//!
//! Two schedules are implemented:
//! - The session schedule: HKDF-SHA256 over the ECDH secret, salted with
//!   `"BitcoinSharedSecret"`, expanded into two 64-byte directional
//!   keypacks and a 32-byte session identifier.
//! - The rekey schedule per the BIP151 draft: each keypack half is replaced
//!   by `SHA256(SHA256(session_id || old_half))`.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::aead::KEYPACK_LEN;
use crate::{Error, Result};

/// HKDF extractor salt for the session schedule.
const SESSION_SALT: &[u8] = b"BitcoinSharedSecret";

/// Expansion labels for the four keypack halves and the session id.
const INFO_K1A: &[u8] = b"BitcoinK1A";
const INFO_K1B: &[u8] = b"BitcoinK1B";
const INFO_K2A: &[u8] = b"BitcoinK2A";
const INFO_K2B: &[u8] = b"BitcoinK2B";
const INFO_SESSION_ID: &[u8] = b"BitcoinSessionID";

/// Keying material derived from one ECDH secret.
///
/// `keypack_1` serves the initiator's send direction and the responder's
/// receive direction; `keypack_2` the opposite. The session id is stable
/// for the connection lifetime and salts every rekey.
pub struct SessionMaterial {
    /// Keypack for the initiator-to-responder direction.
    pub keypack_1: Zeroizing<[u8; KEYPACK_LEN]>,
    /// Keypack for the responder-to-initiator direction.
    pub keypack_2: Zeroizing<[u8; KEYPACK_LEN]>,
    /// 32-byte session identifier.
    pub session_id: [u8; 32],
}

/// Generic HKDF-SHA256 key derivation per RFC 5869.
///
/// # Arguments
/// * `ikm` - Input key material
/// * `salt` - Salt value (empty slice for no salt)
/// * `info` - Context and application-specific information
/// * `output_len` - Length of output key material
///
/// # Returns
/// Derived key material wrapped in `Zeroizing`.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut okm = vec![0u8; output_len];
    hk.expand(info, &mut okm)
        .map_err(|_| Error::KeyDerivation("HKDF expansion failed".into()))?;

    Ok(Zeroizing::new(okm))
}

/// Double SHA-256 over the concatenation of `parts`.
pub fn sha256d(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let first = hasher.finalize();
    let second = Sha256::digest(first);

    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Derive the full session keying material from a 32-byte ECDH secret.
///
/// One HKDF extraction salted with `"BitcoinSharedSecret"`, then five
/// 32-byte expansions: `K1A || K1B` form `keypack_1`, `K2A || K2B` form
/// `keypack_2`, and `BitcoinSessionID` labels the session id. The
/// derivation is deterministic, so both peers arrive at identical material
/// from the shared secret.
pub fn derive_session_material(ecdh_secret: &[u8; 32]) -> Result<SessionMaterial> {
    let hk = Hkdf::<Sha256>::new(Some(SESSION_SALT), ecdh_secret);

    let mut keypack_1 = Zeroizing::new([0u8; KEYPACK_LEN]);
    let mut keypack_2 = Zeroizing::new([0u8; KEYPACK_LEN]);
    let mut session_id = [0u8; 32];

    let (k1a, k1b) = keypack_1.split_at_mut(32);
    let (k2a, k2b) = keypack_2.split_at_mut(32);
    let expansions: [(&[u8], &mut [u8]); 5] = [
        (INFO_K1A, k1a),
        (INFO_K1B, k1b),
        (INFO_K2A, k2a),
        (INFO_K2B, k2b),
        (INFO_SESSION_ID, &mut session_id),
    ];
    for (info, out) in expansions {
        hk.expand(info, out)
            .map_err(|_| Error::KeyDerivation("HKDF expansion failed".into()))?;
    }

    Ok(SessionMaterial {
        keypack_1,
        keypack_2,
        session_id,
    })
}

/// Derive the replacement for a keypack on rekey.
///
/// Per the BIP151 draft rules, each half is rehashed independently:
/// `SHA256(SHA256(session_id || old_half))`. The result replaces the whole
/// keypack; the matching sequence counter must be reset by the caller.
pub fn rekey_keypack(
    session_id: &[u8; 32],
    keypack: &[u8; KEYPACK_LEN],
) -> Zeroizing<[u8; KEYPACK_LEN]> {
    let new_a = sha256d(&[session_id, &keypack[..32]]);
    let new_b = sha256d(&[session_id, &keypack[32..]]);

    let mut out = Zeroizing::new([0u8; KEYPACK_LEN]);
    out[..32].copy_from_slice(&new_a);
    out[32..].copy_from_slice(&new_b);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test RFC 5869 Test Case 1.
    #[test]
    fn test_hkdf_rfc5869() {
        let ikm = hex::decode("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b").unwrap();
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = hkdf_sha256(&ikm, &salt, &info, 42).unwrap();

        let expected = hex::decode(
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865",
        )
        .unwrap();

        assert_eq!(&*okm, &expected);
    }

    /// Test double SHA-256 against the well-known "hello" vector.
    #[test]
    fn test_sha256d_vector() {
        let expected =
            hex::decode("9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50")
                .unwrap();
        assert_eq!(&sha256d(&[b"hello"]), expected.as_slice());
    }

    /// Test that sha256d hashes the concatenation, not the parts.
    #[test]
    fn test_sha256d_concatenation() {
        assert_eq!(sha256d(&[b"he", b"llo"]), sha256d(&[b"hello"]));
        assert_ne!(sha256d(&[b"hello"]), sha256d(&[b"hello "]));
    }

    /// Test that both peers derive identical material from the same secret.
    #[test]
    fn test_session_material_deterministic() {
        let secret = [0x42u8; 32];
        let a = derive_session_material(&secret).unwrap();
        let b = derive_session_material(&secret).unwrap();

        assert_eq!(&*a.keypack_1, &*b.keypack_1);
        assert_eq!(&*a.keypack_2, &*b.keypack_2);
        assert_eq!(a.session_id, b.session_id);
    }

    /// Test that the two directions and the session id are all distinct.
    #[test]
    fn test_session_material_distinct_outputs() {
        let material = derive_session_material(&[0x42u8; 32]).unwrap();

        assert_ne!(&*material.keypack_1, &*material.keypack_2);
        assert_ne!(&material.keypack_1[..32], &material.keypack_1[32..]);
        assert_ne!(&material.keypack_1[..32], &material.session_id);
    }

    /// Test that different secrets derive different material.
    #[test]
    fn test_session_material_secret_sensitivity() {
        let a = derive_session_material(&[0x01u8; 32]).unwrap();
        let b = derive_session_material(&[0x02u8; 32]).unwrap();

        assert_ne!(&*a.keypack_1, &*b.keypack_1);
        assert_ne!(a.session_id, b.session_id);
    }

    /// Test the rekey derivation against its definition.
    #[test]
    fn test_rekey_keypack_definition() {
        let session_id = [0x07u8; 32];
        let mut keypack = [0u8; KEYPACK_LEN];
        for (i, b) in keypack.iter_mut().enumerate() {
            *b = i as u8;
        }

        let next = rekey_keypack(&session_id, &keypack);

        assert_eq!(&next[..32], &sha256d(&[&session_id, &keypack[..32]]));
        assert_eq!(&next[32..], &sha256d(&[&session_id, &keypack[32..]]));
        // The old keypack must not survive into the new one.
        assert_ne!(&next[..32], &keypack[..32]);
        assert_ne!(&next[32..], &keypack[32..]);
    }

    /// Test that rekeying is deterministic and chains.
    #[test]
    fn test_rekey_keypack_deterministic() {
        let session_id = [0x07u8; 32];
        let keypack = [0x11u8; KEYPACK_LEN];

        let first = rekey_keypack(&session_id, &keypack);
        assert_eq!(&*first, &*rekey_keypack(&session_id, &keypack));

        let second = rekey_keypack(&session_id, &first);
        assert_ne!(&*first, &*second);
    }
}
