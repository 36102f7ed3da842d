//! Frequency-domain similarity signatures.
//!
//! The perceptual hash thresholds the low-frequency block of a 2D DCT-II.
//! Low frequencies describe the coarse layout of a raster, so small
//! spatial perturbations move individual coefficients only slightly and
//! most emitted bits survive.

use std::f64::consts::PI;
use std::sync::LazyLock;

use crate::digest::PerceptualHash;
use crate::frame::{CANONICAL_DIM, CANONICAL_LEN};

/// Side length of the planar mosaic the transform runs over.
const MOSAIC_DIM: usize = CANONICAL_DIM * 2;

/// Side length of the retained low-frequency block.
const BLOCK_DIM: usize = 8;

/// Cosine basis for the first `BLOCK_DIM` frequencies over `MOSAIC_DIM`
/// samples.
static COSINES: LazyLock<[[f64; MOSAIC_DIM]; BLOCK_DIM]> = LazyLock::new(|| {
    let mut table = [[0.0; MOSAIC_DIM]; BLOCK_DIM];
    for (freq, row) in table.iter_mut().enumerate() {
        for (pos, cell) in row.iter_mut().enumerate() {
            *cell =
                (PI * (2.0 * pos as f64 + 1.0) * freq as f64 / (2.0 * MOSAIC_DIM as f64)).cos();
        }
    }
    table
});

/// Compute the perceptual signature of a canonical raster.
///
/// The four channel planes (red, green, blue, luma) are tiled into one
/// 64x64 mosaic before the transform. A plain intensity grid would give
/// uniform rasters of different hue nearly identical spectra; separate
/// planes keep chromatic structure visible to the low frequencies. Each
/// retained coefficient except the DC term emits one bit: set when the
/// coefficient exceeds the mean of the retained 63.
pub(crate) fn signature(canonical: &[u8]) -> PerceptualHash {
    debug_assert_eq!(canonical.len(), CANONICAL_LEN);

    let mosaic = build_mosaic(canonical);

    // Row pass: first BLOCK_DIM horizontal frequencies of every mosaic row.
    let mut rows = [[0.0f64; BLOCK_DIM]; MOSAIC_DIM];
    for (y, row_out) in rows.iter_mut().enumerate() {
        let row = &mosaic[y * MOSAIC_DIM..(y + 1) * MOSAIC_DIM];
        for (u, out) in row_out.iter_mut().enumerate() {
            *out = row
                .iter()
                .zip(&COSINES[u])
                .map(|(sample, basis)| sample * basis)
                .sum();
        }
    }

    // Column pass over the row coefficients completes the 2D transform.
    let mut block = [[0.0f64; BLOCK_DIM]; BLOCK_DIM];
    for (v, block_row) in block.iter_mut().enumerate() {
        for (u, out) in block_row.iter_mut().enumerate() {
            *out = rows
                .iter()
                .zip(&COSINES[v])
                .map(|(row, basis)| row[u] * basis)
                .sum();
        }
    }

    // The DC term at (0, 0) is excluded from both the mean and the output.
    let mut sum = 0.0;
    for (v, block_row) in block.iter().enumerate() {
        for (u, coefficient) in block_row.iter().enumerate() {
            if (u, v) != (0, 0) {
                sum += coefficient;
            }
        }
    }
    let mean = sum / f64::from(PerceptualHash::BITS);

    let mut bits = 0u64;
    let mut index = 0u8;
    for (v, block_row) in block.iter().enumerate() {
        for (u, coefficient) in block_row.iter().enumerate() {
            if (u, v) == (0, 0) {
                continue;
            }
            if *coefficient > mean {
                bits |= 1u64 << index;
            }
            index += 1;
        }
    }

    PerceptualHash::from_bits(bits, PerceptualHash::BITS)
}

/// Tile the channel planes of a canonical raster into one square mosaic.
///
/// Quadrants: red top-left, green top-right, blue bottom-left, luma
/// bottom-right.
fn build_mosaic(canonical: &[u8]) -> Vec<f64> {
    let mut mosaic = vec![0.0f64; MOSAIC_DIM * MOSAIC_DIM];
    for y in 0..CANONICAL_DIM {
        for x in 0..CANONICAL_DIM {
            let p = (y * CANONICAL_DIM + x) * 4;
            let r = canonical[p];
            let g = canonical[p + 1];
            let b = canonical[p + 2];
            mosaic[y * MOSAIC_DIM + x] = f64::from(r);
            mosaic[y * MOSAIC_DIM + x + CANONICAL_DIM] = f64::from(g);
            mosaic[(y + CANONICAL_DIM) * MOSAIC_DIM + x] = f64::from(b);
            mosaic[(y + CANONICAL_DIM) * MOSAIC_DIM + x + CANONICAL_DIM] =
                f64::from(luma(r, g, b));
        }
    }
    mosaic
}

/// Integer BT.601-style luma approximation.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b)) >> 8) as u8
}
