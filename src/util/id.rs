//! Time-ordered envelope identifiers.
//!
//! Per the data model (`spec.md` §3, §9 "Identifier choice"), envelope ids
//! are 128 bits: a 48-bit millisecond timestamp in the high bits followed
//! by 80 bits of random entropy, rendered as Crockford base32 so that
//! `readdir()` order on the Maildir `new/` directory is chronological and
//! the string is a safe single filesystem path component.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const TIMESTAMP_BITS: u32 = 48;
const ENTROPY_BITS: u32 = 128 - TIMESTAMP_BITS;
const ENTROPY_MASK: u128 = (1u128 << ENTROPY_BITS) - 1;

/// Time-ordered, lexicographically-sortable envelope identifier.
///
/// `EnvelopeId::new()` packs the current wall-clock millisecond timestamp
/// into the top 48 bits and fills the remaining 80 bits with random
/// entropy, satisfying the "unique, monotonic within a publisher" invariant
/// of `spec.md` §3 without requiring a shared counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(u128);

impl EnvelopeId {
    /// Mint a new id from the current wall-clock time.
    pub fn new() -> Self {
        Self::from_timestamp_ms(Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Build an id for a specific millisecond timestamp, filling the
    /// entropy bits with a fresh random value. Exposed for tests and for
    /// startup reconciliation, where an id must be reconstructed from a
    /// Maildir filename with a known timestamp prefix.
    pub fn from_timestamp_ms(timestamp_ms: u64) -> Self {
        let mut entropy_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut entropy_bytes);
        let entropy = u128::from_be_bytes(entropy_bytes) & ENTROPY_MASK;
        let ts = (timestamp_ms as u128) & ((1u128 << TIMESTAMP_BITS) - 1);
        Self((ts << ENTROPY_BITS) | entropy)
    }

    /// The millisecond timestamp encoded in this id.
    pub fn timestamp_ms(&self) -> u64 {
        (self.0 >> ENTROPY_BITS) as u64
    }

    /// The timestamp as a `DateTime<Utc>`, for `created_at` reconstruction.
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms() as i64)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            base32::encode(base32::Alphabet::Crockford, &self.to_bytes())
        )
    }
}

/// Error returned when a string does not decode into a valid [`EnvelopeId`].
#[derive(Debug, thiserror::Error)]
#[error("invalid envelope id: {0}")]
pub struct InvalidEnvelopeId(String);

impl FromStr for EnvelopeId {
    type Err = InvalidEnvelopeId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = base32::decode(base32::Alphabet::Crockford, s)
            .ok_or_else(|| InvalidEnvelopeId(s.to_string()))?;
        if bytes.len() != 16 {
            return Err(InvalidEnvelopeId(s.to_string()));
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&bytes);
        Ok(Self(u128::from_be_bytes(buf)))
    }
}
