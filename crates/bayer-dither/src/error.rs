//! Error type for the bayer-dither crate.

use std::fmt;

/// Errors returned by [`dither_rgba`](crate::dither_rgba) and
/// [`MatrixSize`](crate::MatrixSize) construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DitherError {
    /// Requested matrix size is not one of 2, 4, 8 or 16.
    InvalidMatrixSize(u32),
    /// Pixel buffer length does not match `width * height * 4`.
    BufferSize {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },
}

impl fmt::Display for DitherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DitherError::InvalidMatrixSize(n) => {
                write!(f, "invalid matrix size {} (expected 2, 4, 8 or 16)", n)
            }
            DitherError::BufferSize { expected, actual } => {
                write!(
                    f,
                    "pixel buffer has {} bytes, expected {}",
                    actual, expected
                )
            }
        }
    }
}

impl std::error::Error for DitherError {}
