//! Two-color palette.

/// An 8-bit RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to a byte array [R, G, B].
    #[inline]
    pub fn to_bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(bytes: [u8; 3]) -> Self {
        Rgb::new(bytes[0], bytes[1], bytes[2])
    }
}

/// The two output colors of the dither.
///
/// Order matters: `light` is written where a pixel's luminosity exceeds the
/// threshold, `dark` everywhere else (ties included).
///
/// ```
/// use bayer_dither::{Palette, Rgb};
///
/// let palette = Palette::new(Rgb::new(250, 245, 235), Rgb::new(20, 20, 30));
/// assert_eq!(palette.light, Rgb::new(250, 245, 235));
/// assert_eq!(Palette::default(), Palette::DEFAULT);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub light: Rgb,
    pub dark: Rgb,
}

impl Palette {
    /// Plain white on black, used whenever no theme palette resolves.
    pub const DEFAULT: Palette = Palette {
        light: Rgb::WHITE,
        dark: Rgb::BLACK,
    };

    pub const fn new(light: Rgb, dark: Rgb) -> Self {
        Self { light, dark }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette::DEFAULT
    }
}
