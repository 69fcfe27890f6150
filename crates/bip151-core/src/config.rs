//! Transport configuration and policy constants.

/// Bytes encrypted on the send side before a rekey is forced.
pub const REKEY_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;

/// Seconds since the last send-side rekey before a rekey is forced.
pub const REKEY_LIMIT_TIME: u64 = 600;

/// Receive-side byte ceiling. A peer that keeps sending past this without
/// rekeying gets the connection dropped. Strictly greater than
/// [`REKEY_LIMIT_BYTES`] so a compliant peer never trips it.
pub const ABORT_LIMIT_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Receive-side time ceiling, seconds. Strictly greater than
/// [`REKEY_LIMIT_TIME`].
pub const ABORT_LIMIT_TIME: u64 = 1200;

/// Minimum seconds between peer-requested rekeys. Requests arriving faster
/// are refused, which is fatal for the connection.
pub const MIN_REKEY_TIME: u64 = 10;

/// Maximum payload size of one packet. Must fit in the 23 usable bits of
/// the length field (the 24th bit is the rekey flag).
pub const MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024;

/// Fast-rekey test schedule: byte trigger.
pub const FAST_REKEY_BYTES: u64 = 12 * 1024;

/// Fast-rekey test schedule: time trigger, seconds.
pub const FAST_REKEY_TIME: u64 = 10;

/// Fast-rekey test schedule: receive-side byte ceiling. Kept above
/// [`FAST_REKEY_BYTES`] so an in-flight packet straddling the rekey
/// trigger does not abort the connection.
pub const FAST_ABORT_BYTES: u64 = 32 * 1024;

/// Main network start bytes, used by the handshake downgrade check.
pub const MAINNET_MAGIC: [u8; 4] = [0xF9, 0xBE, 0xB4, 0xD9];

/// Per-connection transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Enable the insanely small rekey schedule (12 KiB / 10 s) used to
    /// exercise rekeying in tests.
    pub fast_rekey: bool,
    /// Network start bytes a legacy plaintext header would begin with.
    pub network_magic: [u8; 4],
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fast_rekey: false,
            network_magic: MAINNET_MAGIC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_ordered() {
        assert!(ABORT_LIMIT_BYTES > REKEY_LIMIT_BYTES);
        assert!(ABORT_LIMIT_TIME > REKEY_LIMIT_TIME);
        assert!(FAST_ABORT_BYTES > FAST_REKEY_BYTES);
    }

    #[test]
    fn test_max_message_size_encodable() {
        // The length field has 23 usable bits.
        assert!(MAX_MESSAGE_SIZE < (1 << 23));
    }
}
