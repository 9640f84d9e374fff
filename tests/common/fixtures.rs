//! Test fixtures: throwaway site trees and image bytes.

use duodither::models::SiteConfig;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Light theme color declared by [`THEME_CSS`]
pub const LIGHT: [u8; 3] = [250, 245, 235];
/// Dark theme color declared by [`THEME_CSS`]
pub const DARK: [u8; 3] = [20, 20, 30];

pub const THEME_CSS: &str = ":root {
  --main-width: 640px;
  --clr-white: rgb(250, 245, 235);
  --clr-black-a0: rgb(0, 0, 0);
  --clr-black-a10: rgb(20, 20, 30);
}
";

/// A site rooted in a temporary directory
pub struct TestSite {
    dir: TempDir,
    pub config: SiteConfig,
}

impl TestSite {
    /// Empty site with default layout (`assets/img`, `_site`)
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = SiteConfig::with_root(dir.path());
        std::fs::create_dir_all(config.image_dir()).unwrap();
        std::fs::create_dir_all(config.output_dir()).unwrap();
        Self { dir, config }
    }

    /// Site with the theme stylesheet in place
    pub fn themed() -> Self {
        let site = Self::new();
        site.write_stylesheet(THEME_CSS);
        site
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_stylesheet(&self, css: &str) {
        let path = self.config.stylesheet_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, css).unwrap();
    }

    /// Write a gradient PNG below the image directory
    pub fn add_image(&self, rel: &str, width: u32, height: u32) -> PathBuf {
        let path = self.config.image_dir().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, gradient_png(width, height)).unwrap();
        path
    }

    /// Write a generated page below the output directory
    pub fn add_page(&self, rel: &str, html: &str) -> PathBuf {
        let path = self.config.output_dir().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, html).unwrap();
        path
    }

    /// Write a source file (e.g. markdown with front matter) below the root
    pub fn add_source(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn read_page(&self, rel: &str) -> String {
        std::fs::read_to_string(self.config.output_dir().join(rel)).unwrap()
    }

    /// Files below the dithered output directory, relative and sorted
    pub fn dithered_files(&self) -> Vec<String> {
        let root = self.config.dither_output_dir();
        let mut found = Vec::new();
        collect_files(&root, &root, &mut found);
        found.sort();
        found
    }
}

impl Default for TestSite {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_files(root: &Path, dir: &Path, found: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, found);
        } else {
            let rel = path.strip_prefix(root).unwrap();
            found.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

/// PNG bytes of a horizontal black-to-white gradient
pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, _| {
        let v = (x * 255 / width.max(2).saturating_sub(1)).min(255) as u8;
        Rgba([v, v, v, 255])
    });
    encode(&image, ImageFormat::Png)
}

/// PNG bytes of one solid color
pub fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    encode(&RgbaImage::from_pixel(width, height, Rgba(rgba)), ImageFormat::Png)
}

/// A tiny GIF, for the animated-format fallback
pub fn tiny_gif() -> Vec<u8> {
    encode(&RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255])), ImageFormat::Gif)
}

fn encode(image: &RgbaImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).expect("Failed to encode image");
    bytes.into_inner()
}
