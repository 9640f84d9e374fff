pub mod config;
pub mod page;

pub use config::{ConfigError, RunMode, RuntimeConfig, SiteConfig};
pub use page::{dither_disable_value, parse_boolean_like, parse_boolean_str, PageContext};
