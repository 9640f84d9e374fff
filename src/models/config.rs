use bayer_dither::MatrixSize;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Site configuration loaded from config.yaml
#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    /// Root directory all relative paths below are resolved against
    #[serde(default = "default_site_root")]
    pub site_root: PathBuf,

    /// Source images (relative to site_root)
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,

    /// Generated site output (relative to site_root)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Theme stylesheet holding the palette custom properties and main width
    #[serde(default = "default_stylesheet")]
    pub stylesheet: PathBuf,

    /// Bayer matrix size used for build-time renders (2, 4, 8 or 16)
    #[serde(default = "default_bayer_size")]
    pub bayer_size: u32,

    /// Run generated PNGs through oxipng
    #[serde(default)]
    pub optimize_png: bool,

    /// Maximum number of pages transformed at once by `build`
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Origin the site is served from; images on other origins are
    /// candidates for live dithering
    #[serde(default = "default_site_origin")]
    pub site_origin: String,

    /// Runtime renderer settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Settings for the live (runtime) renderer
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on a single remote image fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_site_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("assets/img")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("_site")
}

fn default_stylesheet() -> PathBuf {
    PathBuf::from("assets/css/variables.css")
}

fn default_bayer_size() -> u32 {
    16
}

fn default_concurrency() -> usize {
    8
}

fn default_site_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

/// Error for configuration that parses but cannot be used
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid bayer_size in config: {0}. Use 2, 4, 8 or 16.")]
    InvalidBayerSize(u32),
}

impl SiteConfig {
    /// Load configuration from a YAML file.
    ///
    /// A missing or unparsable file falls back to defaults with a warning.
    /// An unusable `bayer_size` is an error: renders must never silently
    /// switch matrix.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<Self>(&content) {
                Ok(config) => {
                    tracing::info!(
                        path = %path.display(),
                        bayer_size = config.bayer_size,
                        "Loaded configuration"
                    );
                    config
                }
                Err(e) => {
                    tracing::warn!(%e, path = %path.display(), "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(%e, path = %path.display(), "Failed to read config, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if MatrixSize::is_valid(self.bayer_size) {
            Ok(())
        } else {
            Err(ConfigError::InvalidBayerSize(self.bayer_size))
        }
    }

    /// Config rooted at a specific directory, everything else default
    pub fn with_root(site_root: impl Into<PathBuf>) -> Self {
        Self {
            site_root: site_root.into(),
            ..Default::default()
        }
    }

    pub fn image_dir(&self) -> PathBuf {
        self.site_root.join(&self.image_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.site_root.join(&self.output_dir)
    }

    /// Where dithered variants are written inside the output tree
    pub fn dither_output_dir(&self) -> PathBuf {
        self.output_dir().join("assets/img/dither")
    }

    pub fn stylesheet_path(&self) -> PathBuf {
        self.site_root.join(&self.stylesheet)
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site_root: default_site_root(),
            image_dir: default_image_dir(),
            output_dir: default_output_dir(),
            stylesheet: default_stylesheet(),
            bayer_size: default_bayer_size(),
            optimize_png: false,
            concurrency: default_concurrency(),
            site_origin: default_site_origin(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// How the process was launched, from `DUODITHER_RUN_MODE` and
/// `DUODITHER_DISABLE_IN_SERVE`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    pub serve: bool,
    pub disable_in_serve: bool,
}

impl RunMode {
    pub fn from_env() -> Self {
        Self {
            serve: std::env::var("DUODITHER_RUN_MODE").is_ok_and(|v| v == "serve"),
            disable_in_serve: std::env::var("DUODITHER_DISABLE_IN_SERVE").is_ok_and(|v| v == "1"),
        }
    }

    /// Dithering is switched off for every page
    pub fn dither_globally_disabled(&self) -> bool {
        self.serve && self.disable_in_serve
    }
}
