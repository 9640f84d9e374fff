//! Decode, downsample, dither and encode one static image.

use crate::error::PipelineError;
use bayer_dither::{dither_rgba, Palette};
use image::{imageops::FilterType, ImageReader, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Parameters of one build-time render
#[derive(Debug, Clone, Copy)]
pub struct RasterOptions {
    /// Target width; wider sources are scaled down to it
    pub max_width: Option<u32>,
    pub bayer_size: u32,
    pub palette: Palette,
    /// Re-compress the output with oxipng
    pub optimize: bool,
}

/// Decode a PNG or JPEG file to 8-bit RGBA
pub fn decode_file(path: &Path) -> Result<RgbaImage, PipelineError> {
    let decode_err = |message: String| PipelineError::Decode {
        path: path.to_path_buf(),
        message,
    };

    let image = ImageReader::open(path)?
        .with_guessed_format()
        .map_err(|e| decode_err(format!("failed to detect format: {e}")))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))?;

    Ok(image.to_rgba8())
}

/// Scale an image down to `max_width`, keeping its aspect ratio.
///
/// Images already at or below the width are returned as is; nothing is
/// ever scaled up.
pub fn downsample(image: RgbaImage, max_width: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if max_width == 0 || width <= max_width {
        return image;
    }

    let new_height = ((height as f64 * max_width as f64 / width as f64).round() as u32).max(1);
    image::imageops::resize(&image, max_width, new_height, FilterType::Triangle)
}

/// Run the full render for a source file and return PNG bytes
pub fn render_dithered_png(source: &Path, options: &RasterOptions) -> Result<Vec<u8>, PipelineError> {
    let mut image = decode_file(source)?;
    if let Some(max_width) = options.max_width {
        image = downsample(image, max_width);
    }

    let (width, height) = image.dimensions();
    let mut pixels = image.into_raw();
    dither_rgba(
        &mut pixels,
        width as usize,
        height as usize,
        options.bayer_size,
        &options.palette,
    )?;

    let png_bytes = encode_rgba_png(width, height, &pixels)?;
    if !options.optimize {
        return Ok(png_bytes);
    }

    Ok(oxipng::optimize_from_memory(
        &png_bytes,
        &oxipng::Options {
            strip: oxipng::StripChunks::Safe,
            optimize_alpha: false,
            ..Default::default()
        },
    )
    .unwrap_or(png_bytes))
}

/// Render `source` and write the result to `dest` on the blocking pool
pub async fn render_to_file(
    source: PathBuf,
    dest: PathBuf,
    options: RasterOptions,
) -> Result<(), PipelineError> {
    tokio::task::spawn_blocking(move || {
        let bytes = render_dithered_png(&source, &options)?;
        write_atomic(&dest, &bytes)?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::Task(e.to_string()))?
}

/// Encode 8-bit RGBA pixels as a PNG.
pub fn encode_rgba_png(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = png::Encoder::new(&mut buf, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Default);
        let mut writer = encoder
            .write_header()
            .map_err(|e| PipelineError::Encode(e.to_string()))?;
        writer
            .write_image_data(rgba)
            .map_err(|e| PipelineError::Encode(e.to_string()))?;
    }
    Ok(buf.into_inner())
}

/// Write a file so readers only ever see a complete one.
///
/// Bytes go to a uniquely named sibling first and are renamed into place.
/// Two writers racing on the same path both produce complete files and the
/// last rename wins.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}
