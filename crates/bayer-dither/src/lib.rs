//! bayer-dither: two-color ordered dithering
//!
//! Maps an RGBA pixel buffer onto a fixed two-color [`Palette`] by
//! comparing each pixel's luminosity against a tiled Bayer
//! [`ThresholdMatrix`]. The output is fully deterministic: the same input,
//! palette and matrix size always produce byte-identical pixels.
//!
//! # Quick Start
//!
//! ```
//! use bayer_dither::{dither_rgba, Palette};
//!
//! // 2x1 image: one mid-grey pixel, one fully transparent pixel
//! let mut pixels = vec![128, 128, 128, 255, 10, 20, 30, 0];
//!
//! dither_rgba(&mut pixels, 2, 1, 4, &Palette::DEFAULT).unwrap();
//!
//! // Transparent pixels are never rewritten
//! assert_eq!(&pixels[4..], &[10, 20, 30, 0]);
//! ```
//!
//! # Algorithm
//!
//! ```text
//! lum       = 0.299 R + 0.587 G + 0.114 B
//! threshold = M[y mod N][x mod N] / (N² - 1) * 255
//! out       = lum > threshold ? light : dark
//! ```
//!
//! The comparison is strict, so a pixel whose luminosity equals its
//! threshold goes dark. Alpha is ignored for the decision and left as is,
//! and pixels with alpha 0 are skipped entirely.

pub mod dither;
pub mod error;
pub mod matrix;
pub mod palette;

pub use dither::{dither_rgba, luminosity};
pub use error::DitherError;
pub use matrix::{MatrixSize, ThresholdMatrix};
pub use palette::{Palette, Rgb};
