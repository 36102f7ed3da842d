//! Content and perceptual hashing for the dejavu cache.
//!
//! Frames reduce to a canonical upright 32x32 RGBA raster. The canonical
//! bytes feed two hashes with different jobs:
//!
//! - [`ContentHash`]: a SHA-256 key over the canonical raster. Exact,
//!   deterministic, collision-resistant; the primary cache key.
//! - [`PerceptualHash`]: a 63-bit low-frequency signature compared via
//!   Hamming distance. Visually similar frames land within a small
//!   distance of each other; never used as a primary key.
//!
//! A frame that cannot be canonicalized degrades to a random opaque
//! content hash instead of erroring, so hashing never fails a caller.
//!
//! ```rust
//! use dejavu_hash::{Frame, Hasher, PixelFormat};
//!
//! let pixels = vec![0u8; 4 * 4 * 4];
//! let frame = Frame::new(4, 4, PixelFormat::Rgba8, pixels);
//!
//! let hasher = Hasher::default();
//! let hashes = hasher.hash_frame(&frame);
//! assert!(!hashes.degraded);
//! assert_eq!(hashes.content, hasher.hash_frame(&frame).content);
//! ```

mod dct;
pub mod digest;
pub mod frame;
pub mod hasher;

pub use digest::{ContentHash, PerceptualHash};
pub use frame::{Frame, FrameError, FrameFingerprint, Orientation, PixelFormat};
pub use hasher::{DEFAULT_MEMO_CAPACITY, FrameHashes, Hasher};
