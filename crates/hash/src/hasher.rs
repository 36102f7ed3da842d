//! Frame hashing with a structural memo.
//!
//! Computing both hashes reads every pixel, canonicalizes, and runs the
//! frequency transform, so results are memoized under the frame's
//! structural fingerprint. The memo is read-mostly: lookups take a shared
//! lock and only a completed computation takes the exclusive lock briefly.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::dct;
use crate::digest::{ContentHash, PerceptualHash};
use crate::frame::{Frame, FrameFingerprint};

/// Version tag folded under every content hash; bumped whenever the
/// canonical raster format changes.
const CANONICAL_DOMAIN: &[u8] = b"dejavu:canonical:v1\0";

/// Memo entries kept before the table is reset.
pub const DEFAULT_MEMO_CAPACITY: usize = 256;

/// Both hashes of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHashes {
    /// Exact-match key over the canonical raster.
    pub content: ContentHash,
    /// Similarity signature; absent for degraded frames.
    pub perceptual: Option<PerceptualHash>,
    /// True when the frame could not be canonicalized. The content key is
    /// then a random opaque identifier and must never be cached or reused.
    pub degraded: bool,
}

/// Computes content and perceptual hashes for frames.
#[derive(Debug)]
pub struct Hasher {
    memo: RwLock<HashMap<FrameFingerprint, FrameHashes>>,
    capacity: usize,
}

impl Hasher {
    /// Create a hasher whose memo holds up to `memo_capacity` entries.
    ///
    /// The memo is reset wholesale when full. A capacity of zero disables
    /// memoization.
    #[must_use]
    pub fn new(memo_capacity: usize) -> Self {
        Self {
            memo: RwLock::new(HashMap::new()),
            capacity: memo_capacity,
        }
    }

    /// Hash one frame, memoizing the result.
    ///
    /// A frame that fails validation degrades to an opaque random content
    /// hash with no perceptual signature instead of returning an error.
    /// Degraded results are never memoized.
    pub fn hash_frame(&self, frame: &Frame) -> FrameHashes {
        let fingerprint = frame.fingerprint();
        let memoized = self
            .memo
            .read()
            .ok()
            .and_then(|memo| memo.get(&fingerprint).cloned());
        if let Some(hit) = memoized {
            return hit;
        }

        let hashes = match frame.canonical_rgba() {
            Ok(canonical) => FrameHashes {
                content: content_hash(&canonical),
                perceptual: Some(dct::signature(&canonical)),
                degraded: false,
            },
            Err(error) => {
                tracing::warn!(
                    %error,
                    width = frame.width(),
                    height = frame.height(),
                    "frame not canonicalizable, degrading to opaque hash"
                );
                FrameHashes {
                    content: ContentHash::opaque(),
                    perceptual: None,
                    degraded: true,
                }
            }
        };

        if hashes.degraded || self.capacity == 0 {
            return hashes;
        }
        if let Ok(mut memo) = self.memo.write() {
            if memo.len() >= self.capacity {
                memo.clear();
            }
            memo.insert(fingerprint, hashes.clone());
        }
        hashes
    }

    /// Hamming distance between two perceptual hashes, in [0, 1].
    #[must_use]
    pub fn hamming_distance(a: &PerceptualHash, b: &PerceptualHash) -> f64 {
        a.distance(b)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(DEFAULT_MEMO_CAPACITY)
    }
}

/// Content hash of a canonical raster under the domain tag.
fn content_hash(canonical: &[u8]) -> ContentHash {
    let mut keyed = Vec::with_capacity(CANONICAL_DOMAIN.len() + canonical.len());
    keyed.extend_from_slice(CANONICAL_DOMAIN);
    keyed.extend_from_slice(canonical);
    ContentHash::from_data(&keyed)
}
