//! Raw frame descriptions and the canonical raster they reduce to.
//!
//! All hashing operates on a canonical form: the frame is rotated upright,
//! converted to RGBA, and area-averaged down to a fixed 32x32 raster. Two
//! frames that depict the same content through different orientations or
//! pixel layouts canonicalize to identical bytes, so they hash identically.

use bytes::Bytes;

/// Side length in pixels of the canonical raster every frame reduces to.
pub(crate) const CANONICAL_DIM: usize = 32;

/// Byte length of a canonical RGBA raster.
pub(crate) const CANONICAL_LEN: usize = CANONICAL_DIM * CANONICAL_DIM * 4;

/// Frames beyond this edge length are treated as undecodable.
const MAX_DIMENSION: u32 = 1 << 14;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit red, green, blue, alpha.
    Rgba8,
    /// 8-bit blue, green, red, alpha.
    Bgra8,
    /// 8-bit red, green, blue without alpha.
    Rgb8,
    /// Single 8-bit intensity channel.
    Luma8,
}

impl PixelFormat {
    /// Bytes occupied by one pixel.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Rgb8 => 3,
            Self::Luma8 => 1,
        }
    }
}

/// Rotation that brings the stored raster upright.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// Already upright.
    #[default]
    Up,
    /// Rotated 180 degrees.
    Down,
    /// Upright after a 90 degree clockwise rotation.
    Left,
    /// Upright after a 90 degree counter-clockwise rotation.
    Right,
}

/// Errors raised when a frame cannot be canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame carries no pixel data.
    #[error("frame contains no pixel data")]
    EmptyFrame,
    /// The buffer length does not match the declared geometry.
    #[error("frame buffer holds {actual} bytes, geometry requires {expected}")]
    DimensionMismatch {
        /// Bytes the declared width, height, and format require.
        expected: usize,
        /// Bytes actually present in the buffer.
        actual: usize,
    },
    /// The declared dimensions cannot describe a decodable raster.
    #[error("unsupported frame dimensions {width}x{height}")]
    UnsupportedDimensions {
        /// Declared width in pixels.
        width: u32,
        /// Declared height in pixels.
        height: u32,
    },
}

/// A raw content frame submitted for hashing.
///
/// Construction never fails; geometry is validated when the frame is
/// canonicalized so that undecodable input degrades to an opaque identity
/// instead of erroring at the call site. The pixel buffer is reference
/// counted, so cloning a frame is cheap and hashing can move off-thread
/// without copying pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    orientation: Orientation,
    scale: f32,
    data: Bytes,
}

impl Frame {
    /// Create a frame over a pixel buffer.
    ///
    /// The buffer is row-major in the given format. Orientation defaults
    /// to [`Orientation::Up`] and scale to 1.0.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            format,
            orientation: Orientation::Up,
            scale: 1.0,
            data: data.into(),
        }
    }

    /// Set the rotation that brings the raster upright.
    #[must_use]
    pub const fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Set the capture scale factor.
    #[must_use]
    pub const fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Width of the stored raster in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height of the stored raster in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Pixel layout of the buffer.
    #[must_use]
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    /// Rotation that brings the raster upright.
    #[must_use]
    pub const fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Capture scale factor.
    #[must_use]
    pub const fn scale(&self) -> f32 {
        self.scale
    }

    /// The raw pixel buffer.
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Check that the buffer is decodable under the declared geometry.
    ///
    /// # Errors
    ///
    /// Returns the reason the frame cannot be canonicalized.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.data.is_empty() {
            return Err(FrameError::EmptyFrame);
        }
        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(FrameError::UnsupportedDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let expected =
            self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        if self.data.len() != expected {
            return Err(FrameError::DimensionMismatch {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Structural identity used to memoize hash computations.
    ///
    /// Folds the full buffer into a 64-bit digest alongside the geometry,
    /// so frames that differ anywhere in content or shape get distinct
    /// fingerprints with overwhelming probability.
    #[must_use]
    pub fn fingerprint(&self) -> FrameFingerprint {
        FrameFingerprint {
            width: self.width,
            height: self.height,
            format: self.format,
            orientation: self.orientation,
            scale_millis: quantize_scale(self.scale),
            len: self.data.len(),
            digest: fold_bytes(&self.data),
        }
    }

    /// Reduce the frame to the canonical upright 32x32 RGBA raster.
    ///
    /// Each canonical pixel is the integer area average of its source box,
    /// so small spatial shifts and resizes perturb the output only slightly.
    ///
    /// # Errors
    ///
    /// Returns the reason the frame cannot be canonicalized.
    pub fn canonical_rgba(&self) -> Result<Vec<u8>, FrameError> {
        self.validate()?;
        let (upright_w, upright_h) = self.oriented_dimensions();
        let mut canonical = vec![0u8; CANONICAL_LEN];

        for oy in 0..CANONICAL_DIM {
            let (y0, y1) = box_range(oy, upright_h);
            for ox in 0..CANONICAL_DIM {
                let (x0, x1) = box_range(ox, upright_w);
                let mut sums = [0u64; 4];
                for uy in y0..y1 {
                    for ux in x0..x1 {
                        let rgba = self.rgba_at(self.source_offset(ux, uy));
                        for (sum, channel) in sums.iter_mut().zip(rgba) {
                            *sum += u64::from(channel);
                        }
                    }
                }
                let count = u64::from(y1 - y0) * u64::from(x1 - x0);
                let base = (oy * CANONICAL_DIM + ox) * 4;
                for (slot, sum) in canonical[base..base + 4].iter_mut().zip(sums) {
                    *slot = (sum / count) as u8;
                }
            }
        }

        Ok(canonical)
    }

    /// Dimensions of the upright raster.
    const fn oriented_dimensions(&self) -> (u32, u32) {
        match self.orientation {
            Orientation::Up | Orientation::Down => (self.width, self.height),
            Orientation::Left | Orientation::Right => (self.height, self.width),
        }
    }

    /// Byte offset of the stored pixel behind upright coordinates.
    fn source_offset(&self, ux: u32, uy: u32) -> usize {
        let (sx, sy) = match self.orientation {
            Orientation::Up => (ux, uy),
            Orientation::Down => (self.width - 1 - ux, self.height - 1 - uy),
            Orientation::Left => (uy, self.height - 1 - ux),
            Orientation::Right => (self.width - 1 - uy, ux),
        };
        (sy as usize * self.width as usize + sx as usize) * self.format.bytes_per_pixel()
    }

    /// RGBA channels of the pixel at a validated byte offset.
    fn rgba_at(&self, offset: usize) -> [u8; 4] {
        let d = &self.data;
        match self.format {
            PixelFormat::Rgba8 => [d[offset], d[offset + 1], d[offset + 2], d[offset + 3]],
            PixelFormat::Bgra8 => [d[offset + 2], d[offset + 1], d[offset], d[offset + 3]],
            PixelFormat::Rgb8 => [d[offset], d[offset + 1], d[offset + 2], u8::MAX],
            PixelFormat::Luma8 => {
                let v = d[offset];
                [v, v, v, u8::MAX]
            }
        }
    }
}

/// Opaque memo key for a frame's hash computation.
///
/// Two frames with equal fingerprints carry the same geometry and, with
/// overwhelming probability, the same pixel content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameFingerprint {
    width: u32,
    height: u32,
    format: PixelFormat,
    orientation: Orientation,
    scale_millis: i32,
    len: usize,
    digest: u64,
}

/// Source pixel range behind one canonical pixel along one axis.
///
/// Boxes partition the extent when it is at least `CANONICAL_DIM` wide and
/// replicate source pixels when it is narrower; every box covers at least
/// one pixel.
fn box_range(index: usize, extent: u32) -> (u32, u32) {
    let start = ((index as u64 * u64::from(extent)) / CANONICAL_DIM as u64) as u32;
    let start = start.min(extent - 1);
    let end = (((index as u64 + 1) * u64::from(extent)) / CANONICAL_DIM as u64) as u32;
    (start, end.max(start + 1))
}

/// FNV-1a fold over the full buffer.
fn fold_bytes(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET, |acc, byte| {
        (acc ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Quantize scale to milli-units so float jitter does not split memo keys.
fn quantize_scale(scale: f32) -> i32 {
    if scale.is_finite() {
        (f64::from(scale) * 1000.0).round() as i32
    } else {
        i32::MIN
    }
}
