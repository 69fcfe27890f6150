//! Per-connection session keystate.
//!
//! A [`Session`] owns everything one TCP connection needs to speak the
//! encrypted protocol: the ephemeral handshake keypair, the two 64-byte
//! directional keypacks, the session identifier, sequence and byte
//! counters, and the send/recv packet ciphers. All operations take
//! `&mut self`; the connection owner serializes access (one session is
//! driven by one connection task).
//!
//! Key schedule: the ECDH secret is expanded with HKDF-SHA256 into
//! `keypack_1`, `keypack_2` and the session id. The initiator sends under
//! K1 and receives under K2; the responder the opposite. The assignment is
//! fixed at handshake completion. Rekeying replaces a keypack with
//! `SHA256d(session_id || half)` per half and resets that direction's
//! sequence counter.

use std::sync::Arc;

use tracing::{debug, warn};
use zeroize::Zeroizing;

use bip151_crypto::aead::{PacketCipher, KEYPACK_LEN};
use bip151_crypto::kdf::{derive_session_material, rekey_keypack};
use bip151_crypto::kex::{EphemeralKeypair, X_ONLY_LEN};

use crate::clock::{Clock, SystemClock};
use crate::config::{
    TransportConfig, ABORT_LIMIT_BYTES, ABORT_LIMIT_TIME, FAST_ABORT_BYTES, FAST_REKEY_BYTES,
    FAST_REKEY_TIME, MIN_REKEY_TIME, REKEY_LIMIT_BYTES, REKEY_LIMIT_TIME,
};
use crate::{Error, Result};

/// Which side of the connection this session is.
///
/// The initiator is the peer that dialed the connection and sends its
/// ephemeral key first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialing side: sends under keypack 1, receives under keypack 2.
    Initiator,
    /// Accepting side: sends under keypack 2, receives under keypack 1.
    Responder,
}

/// Session states across the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Ephemeral key generated, nothing exchanged.
    Fresh,
    /// Local key sent, waiting for the peer's key (initiator path).
    HandshakeSent,
    /// Peer key processed, local key not yet sent (responder path).
    HandshakeReceived,
    /// Directional keys installed; all traffic is encrypted.
    Encrypted,
    /// A fatal error occurred; the session must be discarded.
    Aborted,
}

/// Per-connection encryption state.
pub struct Session {
    role: Role,
    state: SessionState,
    config: TransportConfig,
    clock: Arc<dyn Clock>,

    /// Ephemeral keypair, taken (and erased) by the ECDH computation.
    ephemeral: Option<EphemeralKeypair>,
    /// X coordinate of the local ephemeral key, cached so it can still be
    /// sent after the private key has been consumed.
    local_pubkey: [u8; X_ONLY_LEN],
    /// ECDH output, held only between handshake steps.
    ecdh_secret: Option<Zeroizing<[u8; 32]>>,

    keypack_1: Zeroizing<[u8; KEYPACK_LEN]>,
    keypack_2: Zeroizing<[u8; KEYPACK_LEN]>,
    session_id: [u8; 32],

    pub(crate) send_cipher: Option<PacketCipher>,
    pub(crate) recv_cipher: Option<PacketCipher>,
    pub(crate) send_seq: u64,
    pub(crate) recv_seq: u64,
    pub(crate) bytes_encrypted: u64,
    pub(crate) bytes_decrypted: u64,
    last_rekey_send: u64,
    last_rekey_recv: u64,
}

impl Session {
    /// Create a session for one connection using the system clock.
    pub fn new(role: Role, config: TransportConfig) -> Self {
        Self::with_clock(role, config, Arc::new(SystemClock))
    }

    /// Create a session with an explicit clock (tests drive a mock clock
    /// across the rekey thresholds).
    pub fn with_clock(role: Role, config: TransportConfig, clock: Arc<dyn Clock>) -> Self {
        let ephemeral = EphemeralKeypair::generate();
        let local_pubkey = *ephemeral.x_only();
        Self {
            role,
            state: SessionState::Fresh,
            config,
            clock,
            ephemeral: Some(ephemeral),
            local_pubkey,
            ecdh_secret: None,
            keypack_1: Zeroizing::new([0u8; KEYPACK_LEN]),
            keypack_2: Zeroizing::new([0u8; KEYPACK_LEN]),
            session_id: [0u8; 32],
            send_cipher: None,
            recv_cipher: None,
            send_seq: 0,
            recv_seq: 0,
            bytes_encrypted: 0,
            bytes_decrypted: 0,
            last_rekey_send: 0,
            last_rekey_recv: 0,
        }
    }

    /// Replace the ephemeral keypair with one built from a fixed seed.
    ///
    /// Only meaningful before any handshake step has run. Exists for tests
    /// with known keys.
    #[doc(hidden)]
    pub fn set_ephemeral_seed(&mut self, seed: [u8; 32]) -> Result<()> {
        if self.state != SessionState::Fresh {
            return Err(Error::InvalidState(
                "ephemeral key can only be replaced before the handshake".into(),
            ));
        }
        let ephemeral = EphemeralKeypair::from_seed(seed)
            .map_err(|e| Error::BadHandshake(e.to_string()))?;
        self.local_pubkey = *ephemeral.x_only();
        self.ephemeral = Some(ephemeral);
        Ok(())
    }

    /// Produce the local 32-byte handshake key for transmission.
    ///
    /// For the initiator this is the first handshake step. For the
    /// responder it is the second: the peer's key has already been
    /// processed, so emitting ours completes the handshake and installs
    /// the directional keys.
    pub fn handshake_init(&mut self) -> Result<[u8; X_ONLY_LEN]> {
        match self.state {
            SessionState::Fresh => {
                self.state = SessionState::HandshakeSent;
                Ok(self.local_pubkey)
            }
            SessionState::HandshakeReceived => {
                self.install_keys()?;
                Ok(self.local_pubkey)
            }
            _ => Err(Error::InvalidState(
                "handshake key already sent or session encrypted".into(),
            )),
        }
    }

    /// Process the peer's 32-byte handshake key.
    ///
    /// Reconstructs the even-parity point, validates it, computes the ECDH
    /// secret, and erases the local ephemeral private key. For the
    /// initiator (who already sent its key) this completes the handshake;
    /// for the responder the session waits in `HandshakeReceived` until
    /// [`Self::handshake_init`] emits the local key.
    pub fn handshake_process(&mut self, peer_pubkey: &[u8; X_ONLY_LEN]) -> Result<()> {
        let install_now = match self.state {
            SessionState::HandshakeSent => true,
            SessionState::Fresh => false,
            _ => {
                return Err(Error::InvalidState(
                    "peer handshake key already processed".into(),
                ))
            }
        };

        let ephemeral = self.ephemeral.take().ok_or_else(|| {
            Error::InvalidState("ephemeral key already consumed".into())
        })?;
        let secret = ephemeral
            .ecdh(peer_pubkey)
            .map_err(|e| Error::BadHandshake(e.to_string()))?;
        self.ecdh_secret = Some(secret);

        if install_now {
            self.install_keys()
        } else {
            self.state = SessionState::HandshakeReceived;
            Ok(())
        }
    }

    /// Expand the ECDH secret into directional keys and enable encryption.
    fn install_keys(&mut self) -> Result<()> {
        let secret = self.ecdh_secret.take().ok_or_else(|| {
            Error::InvalidState("no ECDH secret available for key derivation".into())
        })?;
        let material = derive_session_material(&secret)?;
        drop(secret);

        self.keypack_1 = material.keypack_1;
        self.keypack_2 = material.keypack_2;
        self.session_id = material.session_id;

        self.send_seq = 0;
        self.recv_seq = 0;
        self.bytes_encrypted = 0;
        self.bytes_decrypted = 0;
        let now = self.clock.now();
        self.last_rekey_send = now;
        self.last_rekey_recv = now;

        let (send_keypack, recv_keypack) = match self.role {
            Role::Initiator => (&self.keypack_1, &self.keypack_2),
            Role::Responder => (&self.keypack_2, &self.keypack_1),
        };
        self.send_cipher = Some(PacketCipher::new(send_keypack));
        self.recv_cipher = Some(PacketCipher::new(recv_keypack));

        self.state = SessionState::Encrypted;
        debug!(role = ?self.role, "encryption enabled");
        Ok(())
    }

    /// Whether a send-side rekey is due before the next packet.
    pub fn should_rekey_send(&self) -> bool {
        if self.state != SessionState::Encrypted {
            return false;
        }
        let now = self.clock.now();
        let elapsed = now.saturating_sub(self.last_rekey_send);
        if self.config.fast_rekey
            && (self.bytes_encrypted >= FAST_REKEY_BYTES || elapsed > FAST_REKEY_TIME)
        {
            debug!("send rekey due (fast-rekey test schedule)");
            return true;
        }
        if self.bytes_encrypted >= REKEY_LIMIT_BYTES || elapsed >= REKEY_LIMIT_TIME {
            debug!(
                bytes = self.bytes_encrypted,
                elapsed, "send rekey limits reached"
            );
            return true;
        }
        false
    }

    /// Replace the keypack serving one direction and reset its counters.
    ///
    /// `send = true` rotates the send channel; it is never refused. `send =
    /// false` rotates the receive channel in response to the peer's in-band
    /// flag and is refused with [`Error::RekeyRefused`] when the peer
    /// requests rekeys faster than [`MIN_REKEY_TIME`].
    pub fn rekey(&mut self, send: bool) -> Result<()> {
        if self.state != SessionState::Encrypted {
            return Err(Error::InvalidState("rekey before handshake completion".into()));
        }
        let now = self.clock.now();
        if !send && now.saturating_sub(self.last_rekey_recv) < MIN_REKEY_TIME {
            warn!("refusing peer-requested rekey below minimum interval");
            return Err(Error::RekeyRefused);
        }
        debug!(channel = if send { "send" } else { "recv" }, "rekeying");

        let keypack = match (send, self.role) {
            (true, Role::Initiator) | (false, Role::Responder) => &mut self.keypack_1,
            (true, Role::Responder) | (false, Role::Initiator) => &mut self.keypack_2,
        };
        let next = rekey_keypack(&self.session_id, keypack);
        keypack.copy_from_slice(&next[..]);

        if send {
            if let Some(cipher) = self.send_cipher.as_mut() {
                cipher.rekey(keypack);
            }
            self.send_seq = 0;
            self.bytes_encrypted = 0;
            self.last_rekey_send = now;
        } else {
            if let Some(cipher) = self.recv_cipher.as_mut() {
                cipher.rekey(keypack);
            }
            self.recv_seq = 0;
            self.bytes_decrypted = 0;
            self.last_rekey_recv = now;
        }
        Ok(())
    }

    /// Reject an inbound packet when the peer has overrun the abort limits.
    pub(crate) fn check_abuse_limits(&self, frame_len: usize) -> Result<()> {
        let now = self.clock.now();
        let projected = self.bytes_decrypted + frame_len as u64;
        if projected > ABORT_LIMIT_BYTES
            || now.saturating_sub(self.last_rekey_send) > ABORT_LIMIT_TIME
        {
            warn!(projected, "abort limits exceeded, dropping connection");
            return Err(Error::ProtocolAbuse(
                "peer exceeded rekey abort limits".into(),
            ));
        }
        if self.config.fast_rekey && projected > FAST_ABORT_BYTES {
            warn!(projected, "fast-rekey abort limit exceeded");
            return Err(Error::ProtocolAbuse(
                "peer exceeded fast-rekey abort limit".into(),
            ));
        }
        Ok(())
    }

    /// Mark the session unusable after a fatal error.
    pub(crate) fn abort(&mut self) {
        self.state = SessionState::Aborted;
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// The 32-byte session identifier. All zero until encryption is enabled.
    pub fn session_id(&self) -> [u8; 32] {
        self.session_id
    }

    /// True once the handshake is complete and traffic must be encrypted.
    pub fn should_encrypt(&self) -> bool {
        self.state == SessionState::Encrypted
    }

    /// This session's role.
    pub fn role(&self) -> Role {
        self.role
    }
}
