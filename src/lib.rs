//! duodither - two-tone ordered dithering for static sites
//!
//! Rewrites local image references in generated pages to content-addressed,
//! Bayer-dithered PNG renditions, and renders cross-origin images live
//! through the same dithering core.
//! This library exposes modules for integration testing.

pub mod api;
pub mod error;
pub mod models;
pub mod rendering;
pub mod runtime;
pub mod server;
pub mod services;
