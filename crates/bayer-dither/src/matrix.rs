//! Bayer threshold matrices.
//!
//! One static matrix exists per supported size. Each N×N matrix is a
//! permutation of `0..N²`, built with the usual recursive construction
//! `M(2n) = [[4M, 4M+2], [4M+3, 4M+1]]`.

use std::fmt;

use crate::error::DitherError;

const BAYER_2: [[u8; 2]; 2] = [[0, 2], [3, 1]];

const BAYER_4: [[u8; 4]; 4] = [
    [0, 8, 2, 10],
    [12, 4, 14, 6],
    [3, 11, 1, 9],
    [15, 7, 13, 5],
];

const BAYER_8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

#[rustfmt::skip]
const BAYER_16: [[u8; 16]; 16] = [
    [0, 128, 32, 160, 8, 136, 40, 168, 2, 130, 34, 162, 10, 138, 42, 170],
    [192, 64, 224, 96, 200, 72, 232, 104, 194, 66, 226, 98, 202, 74, 234, 106],
    [48, 176, 16, 144, 56, 184, 24, 152, 50, 178, 18, 146, 58, 186, 26, 154],
    [240, 112, 208, 80, 248, 120, 216, 88, 242, 114, 210, 82, 250, 122, 218, 90],
    [12, 140, 44, 172, 4, 132, 36, 164, 14, 142, 46, 174, 6, 134, 38, 166],
    [204, 76, 236, 108, 196, 68, 228, 100, 206, 78, 238, 110, 198, 70, 230, 102],
    [60, 188, 28, 156, 52, 180, 20, 148, 62, 190, 30, 158, 54, 182, 22, 150],
    [252, 124, 220, 92, 244, 116, 212, 84, 254, 126, 222, 94, 246, 118, 214, 86],
    [3, 131, 35, 163, 11, 139, 43, 171, 1, 129, 33, 161, 9, 137, 41, 169],
    [195, 67, 227, 99, 203, 75, 235, 107, 193, 65, 225, 97, 201, 73, 233, 105],
    [51, 179, 19, 147, 59, 187, 27, 155, 49, 177, 17, 145, 57, 185, 25, 153],
    [243, 115, 211, 83, 251, 123, 219, 91, 241, 113, 209, 81, 249, 121, 217, 89],
    [15, 143, 47, 175, 7, 135, 39, 167, 13, 141, 45, 173, 5, 133, 37, 165],
    [207, 79, 239, 111, 199, 71, 231, 103, 205, 77, 237, 109, 197, 69, 229, 101],
    [63, 191, 31, 159, 55, 183, 23, 151, 61, 189, 29, 157, 53, 181, 21, 149],
    [255, 127, 223, 95, 247, 119, 215, 87, 253, 125, 221, 93, 245, 117, 213, 85],
];

static MATRIX_2: ThresholdMatrix = ThresholdMatrix::from_rows(2, flatten2());
static MATRIX_4: ThresholdMatrix = ThresholdMatrix::from_rows(4, flatten4());
static MATRIX_8: ThresholdMatrix = ThresholdMatrix::from_rows(8, flatten8());
static MATRIX_16: ThresholdMatrix = ThresholdMatrix::from_rows(16, flatten16());

/// Side length of a supported threshold matrix.
///
/// Only 2, 4, 8 and 16 are valid. Construction goes through
/// [`TryFrom<u32>`], which rejects anything else with
/// [`DitherError::InvalidMatrixSize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixSize(u8);

impl MatrixSize {
    /// The size used when a caller's contract calls for a default.
    pub const DEFAULT: MatrixSize = MatrixSize(16);

    /// All supported sizes, smallest first.
    pub const ALL: [MatrixSize; 4] = [MatrixSize(2), MatrixSize(4), MatrixSize(8), MatrixSize(16)];

    /// Side length in cells.
    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// Whether `n` names a supported matrix size.
    pub fn is_valid(n: u32) -> bool {
        matches!(n, 2 | 4 | 8 | 16)
    }

    /// Parse a size from loosely formatted text, substituting a default.
    ///
    /// Leading/trailing whitespace is ignored and trailing garbage after the
    /// leading integer is dropped (`"8px"` parses as 8). When the text does
    /// not name a valid size, `fallback` is used if it is valid, otherwise
    /// [`MatrixSize::DEFAULT`].
    ///
    /// This is an explicit defaulting helper; [`crate::dither_rgba`] itself
    /// never substitutes a default.
    ///
    /// ```
    /// use bayer_dither::MatrixSize;
    ///
    /// assert_eq!(MatrixSize::normalize(" 4 ", 16).get(), 4);
    /// assert_eq!(MatrixSize::normalize("7", 8).get(), 8);
    /// assert_eq!(MatrixSize::normalize("", 3).get(), 16);
    /// ```
    pub fn normalize(raw: &str, fallback: u32) -> MatrixSize {
        let trimmed = raw.trim();
        let digits_end = trimmed
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
            .map(|(i, _)| i)
            .unwrap_or(trimmed.len());

        trimmed[..digits_end]
            .parse::<u32>()
            .ok()
            .and_then(|n| MatrixSize::try_from(n).ok())
            .or_else(|| MatrixSize::try_from(fallback).ok())
            .unwrap_or(MatrixSize::DEFAULT)
    }
}

impl TryFrom<u32> for MatrixSize {
    type Error = DitherError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        if MatrixSize::is_valid(n) {
            Ok(MatrixSize(n as u8))
        } else {
            Err(DitherError::InvalidMatrixSize(n))
        }
    }
}

impl Default for MatrixSize {
    fn default() -> Self {
        MatrixSize::DEFAULT
    }
}

impl fmt::Display for MatrixSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable N×N ordered-dithering threshold matrix.
///
/// Cells are stored row-major in a fixed 256-entry array so every size can
/// live in a `static`.
#[derive(Debug)]
pub struct ThresholdMatrix {
    size: usize,
    cells: [u8; 256],
}

impl ThresholdMatrix {
    const fn from_rows(size: usize, cells: [u8; 256]) -> Self {
        Self { size, cells }
    }

    /// The shared matrix for a given size.
    pub fn for_size(size: MatrixSize) -> &'static ThresholdMatrix {
        match size.get() {
            2 => &MATRIX_2,
            4 => &MATRIX_4,
            8 => &MATRIX_8,
            _ => &MATRIX_16,
        }
    }

    /// Side length.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Largest cell value, `N² - 1`.
    #[inline]
    pub fn max_value(&self) -> u32 {
        (self.size * self.size - 1) as u32
    }

    /// Raw threshold at pixel `(x, y)`, tiling the matrix across the image.
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> u8 {
        self.cells[(y % self.size) * self.size + (x % self.size)]
    }

    /// Threshold at `(x, y)` scaled onto the 0..=255 luminosity range.
    #[inline]
    pub fn normalized(&self, x: usize, y: usize) -> f64 {
        self.at(x, y) as f64 / self.max_value() as f64 * 255.0
    }

    /// Iterate over the cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = u8> + '_ {
        self.cells[..self.size * self.size].iter().copied()
    }
}

const fn flatten2() -> [u8; 256] {
    let mut out = [0u8; 256];
    let mut i = 0;
    while i < 4 {
        out[i] = BAYER_2[i / 2][i % 2];
        i += 1;
    }
    out
}

const fn flatten4() -> [u8; 256] {
    let mut out = [0u8; 256];
    let mut i = 0;
    while i < 16 {
        out[i] = BAYER_4[i / 4][i % 4];
        i += 1;
    }
    out
}

const fn flatten8() -> [u8; 256] {
    let mut out = [0u8; 256];
    let mut i = 0;
    while i < 64 {
        out[i] = BAYER_8[i / 8][i % 8];
        i += 1;
    }
    out
}

const fn flatten16() -> [u8; 256] {
    let mut out = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        out[i] = BAYER_16[i / 16][i % 16];
        i += 1;
    }
    out
}
