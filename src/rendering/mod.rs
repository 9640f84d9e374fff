pub mod raster;

pub use raster::{
    decode_file, downsample, encode_rgba_png, render_dithered_png, render_to_file, write_atomic,
    RasterOptions,
};
