//! The ordered dithering pass.

use crate::error::DitherError;
use crate::matrix::{MatrixSize, ThresholdMatrix};
use crate::palette::Palette;

/// ITU-R BT.601 luma of an 8-bit RGB pixel.
#[inline]
pub fn luminosity(r: u8, g: u8, b: u8) -> f64 {
    0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64
}

/// Dither an RGBA buffer in place onto a two-color palette.
///
/// `buffer` is row-major, top-to-bottom, 4 bytes per pixel. Every pixel with
/// non-zero alpha has its RGB replaced by `palette.light` or `palette.dark`;
/// alpha bytes are never written.
///
/// # Errors
///
/// - [`DitherError::InvalidMatrixSize`] if `matrix_size` is not 2, 4, 8 or
///   16. No default is substituted; see [`MatrixSize::normalize`] for that.
/// - [`DitherError::BufferSize`] if the buffer length is not
///   `width * height * 4`.
///
/// ```
/// use bayer_dither::{dither_rgba, DitherError, Palette};
///
/// let mut pixels = vec![0u8; 4];
/// assert_eq!(
///     dither_rgba(&mut pixels, 1, 1, 3, &Palette::DEFAULT),
///     Err(DitherError::InvalidMatrixSize(3))
/// );
/// ```
pub fn dither_rgba(
    buffer: &mut [u8],
    width: usize,
    height: usize,
    matrix_size: u32,
    palette: &Palette,
) -> Result<(), DitherError> {
    let size = MatrixSize::try_from(matrix_size)?;

    let expected = width * height * 4;
    if buffer.len() != expected {
        return Err(DitherError::BufferSize {
            expected,
            actual: buffer.len(),
        });
    }

    let matrix = ThresholdMatrix::for_size(size);
    let light = palette.light.to_bytes();
    let dark = palette.dark.to_bytes();

    for (y, row) in buffer.chunks_exact_mut(width.max(1) * 4).enumerate() {
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            if px[3] == 0 {
                continue;
            }

            let lum = luminosity(px[0], px[1], px[2]);
            let color = if lum > matrix.normalized(x, y) {
                light
            } else {
                dark
            };
            px[..3].copy_from_slice(&color);
        }
    }

    Ok(())
}
