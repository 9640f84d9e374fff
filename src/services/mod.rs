pub mod build_cache;
pub mod file_watcher;
pub mod front_matter;
pub mod markup;
pub mod palette_resolver;
pub mod site_builder;
pub mod transform;

pub use build_cache::{BuildCache, EnsureOutcome};
pub use file_watcher::{FileChangeEvent, FileWatcher};
pub use palette_resolver::{PaletteResolver, Theme};
pub use site_builder::{BuildReport, SiteBuilder};
pub use transform::{DitherTransform, Variant};
