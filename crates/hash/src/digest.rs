//! Hash value types: exact content keys and perceptual signatures.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A content identifier (SHA-256 hash as hex string).
///
/// Deterministic over canonical frame bytes, so it serves as the primary
/// key for exact-match lookups and as a filesystem-safe file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the content hash of a byte buffer.
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hex::encode(hash))
    }

    /// Create from a hex string, validating shape.
    ///
    /// Returns `None` unless the input is exactly 64 hex digits.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let s = hex.into();
        let well_formed = s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit());
        well_formed.then_some(Self(s))
    }

    /// A random identifier shaped like a content hash.
    ///
    /// Used when a frame cannot be canonicalized: the key participates in
    /// lookups without ever matching previous or future content.
    #[must_use]
    pub fn opaque() -> Self {
        Self::from_data(Uuid::new_v4().as_bytes())
    }

    /// Get the hex representation.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed-length frequency-domain signature compared via Hamming distance.
///
/// Never used as a primary key; only the similarity index consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash {
    bits: u64,
    len: u8,
}

impl PerceptualHash {
    /// Bits a full-length signature carries.
    pub const BITS: u8 = 63;

    /// Construct from raw bits, masking to the low `len` bits.
    #[must_use]
    pub fn from_bits(bits: u64, len: u8) -> Self {
        let len = len.min(64);
        let mask = if len == 64 {
            u64::MAX
        } else {
            (1u64 << len) - 1
        };
        Self {
            bits: bits & mask,
            len,
        }
    }

    /// Raw bit pattern.
    #[must_use]
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// Number of meaningful bits.
    #[must_use]
    pub const fn bit_len(&self) -> u8 {
        self.len
    }

    /// Fraction of differing bits, in [0, 1].
    ///
    /// Signatures of different lengths are not comparable and report the
    /// maximum distance instead of erroring.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        if self.len != other.len || self.len == 0 {
            return 1.0;
        }
        f64::from((self.bits ^ other.bits).count_ones()) / f64::from(self.len)
    }

    /// Similarity in [0, 1], the complement of [`Self::distance`].
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f64 {
        1.0 - self.distance(other)
    }
}

impl std::fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.bits)
    }
}
