//! Build-time page transform: point local images at dithered renditions.

use crate::error::PipelineError;
use crate::models::{dither_disable_value, PageContext, RunMode, SiteConfig};
use crate::rendering::RasterOptions;
use crate::services::build_cache::{file_fingerprint, BuildCache};
use crate::services::markup::{
    add_class, get_attr, has_attr, has_class, img_tag_regex, remove_attr, set_attr,
    strip_hover_keyword, wrap_hover_images, HOVER_ATTR, HOVER_CLASS,
};
use crate::services::palette_resolver::{PaletteResolver, Theme};
use futures_util::future::join_all;
use std::path::{Component, Path, PathBuf};

const ASSET_MARKER: &str = "assets/img/";

/// Which rendition an image gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Full main-column width, for images marked `imgPrincipal`
    Large,
    /// Half the main-column width
    Small,
}

impl Variant {
    pub fn for_tag(tag: &str) -> Self {
        if has_class(tag, "imgPrincipal") {
            Variant::Large
        } else {
            Variant::Small
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Large => "large",
            Variant::Small => "small",
        }
    }

    pub fn width(self, main_width: u32) -> u32 {
        match self {
            Variant::Large => main_width,
            Variant::Small => ((main_width as f64 / 2.0).round() as u32).max(1),
        }
    }
}

/// A local image reference split into asset path and preserved suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    /// Path below the image directory, always with `/` separators
    pub rel: String,
    /// `?query` and/or `#fragment` of the original reference
    pub suffix: String,
}

/// Parse an `src` value into a local raster asset reference.
///
/// Remote, protocol-relative and `data:` sources are rejected, as is
/// anything outside `assets/img/` or not a PNG or JPEG.
pub fn normalize_src(src: &str) -> Option<AssetRef> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://")
        || lower.starts_with("https://")
        || trimmed.starts_with("//")
        || lower.starts_with("data:")
    {
        return None;
    }

    let (base, suffix) = match trimmed.find(['?', '#']) {
        Some(i) => trimmed.split_at(i),
        None => (trimmed, ""),
    };

    let idx = base.find(ASSET_MARKER)?;
    let rel = base[idx + ASSET_MARKER.len()..].trim_start_matches('/');
    if rel.is_empty() || !has_raster_extension(rel) {
        return None;
    }
    if Path::new(rel)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    Some(AssetRef {
        rel: rel.to_string(),
        suffix: suffix.to_string(),
    })
}

fn has_raster_extension(rel: &str) -> bool {
    let lower = rel.to_ascii_lowercase();
    lower.ends_with(".png") || lower.ends_with(".jpg") || lower.ends_with(".jpeg")
}

/// Where a dithered rendition comes from and goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DitherTarget {
    pub source: PathBuf,
    pub dest: PathBuf,
    /// Public URL including the original suffix
    pub url: String,
}

/// Where an untouched original is staged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalTarget {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Markup transform run on every generated page
pub struct DitherTransform {
    config: SiteConfig,
    resolver: PaletteResolver,
    run_mode: RunMode,
}

struct TagPlan {
    target: DitherTarget,
    width: u32,
    hover: bool,
    /// `Some(cleaned)` when the alt keyword must be stripped
    cleaned_alt: Option<String>,
}

impl DitherTransform {
    pub fn new(config: SiteConfig, run_mode: RunMode) -> Self {
        let resolver = PaletteResolver::new(config.stylesheet_path());
        Self {
            config,
            resolver,
            run_mode,
        }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Transform one rendered page.
    ///
    /// Non-page outputs pass through. On pages with dithering disabled the
    /// originals are staged and the markup is returned unchanged.
    pub async fn transform(
        &self,
        cache: &BuildCache,
        html: &str,
        output_path: &Path,
        page: &PageContext,
    ) -> String {
        if !output_path.to_string_lossy().ends_with(".html") {
            return html.to_string();
        }

        if self.run_mode.dither_globally_disabled() {
            tracing::debug!(output = %output_path.display(), "Dithering disabled in serve mode");
            self.stage_originals(cache, html).await;
            return html.to_string();
        }

        if self.dither_disabled(cache, page) {
            tracing::debug!(output = %output_path.display(), "Dithering disabled for page");
            self.stage_originals(cache, html).await;
            return html.to_string();
        }

        self.rewrite(cache, html).await
    }

    /// Page-level opt-out: template context, then page data, then front
    /// matter. Front matter can only switch dithering off.
    pub fn dither_disabled(&self, cache: &BuildCache, page: &PageContext) -> bool {
        if let Some(decided) = page.disable_from_data() {
            return decided;
        }

        let Some(input) = page.input_path.as_deref() else {
            return false;
        };
        let input = if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.config.site_root.join(input)
        };

        cache
            .front_matter(&input)
            .as_ref()
            .and_then(dither_disable_value)
            == Some(true)
    }

    /// Resolve the dithered rendition for an `src` value
    pub fn dither_target(&self, src: &str, variant: Variant) -> Result<Option<DitherTarget>, PipelineError> {
        let Some(asset) = normalize_src(src) else {
            return Ok(None);
        };
        let source = self.source_path(&asset.rel)?;
        let meta = std::fs::metadata(&source)?;
        let (size, mtime_ms) = file_fingerprint(&meta);

        let rel = Path::new(&asset.rel);
        let stem = rel
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let rel_dir = asset
            .rel
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("");

        let name = format!("{stem}-{size}-{mtime_ms}-{}.png", variant.as_str());
        let mut dest = self.config.dither_output_dir();
        if !rel_dir.is_empty() {
            dest.push(rel_dir);
        }
        dest.push(&name);

        let url = if rel_dir.is_empty() {
            format!("/assets/img/dither/{name}{}", asset.suffix)
        } else {
            format!("/assets/img/dither/{rel_dir}/{name}{}", asset.suffix)
        };

        Ok(Some(DitherTarget { source, dest, url }))
    }

    /// Resolve where the original of an `src` value is staged
    pub fn original_target(&self, src: &str) -> Result<Option<OriginalTarget>, PipelineError> {
        let Some(asset) = normalize_src(src) else {
            return Ok(None);
        };
        let source = self.source_path(&asset.rel)?;
        let dest = self.config.output_dir().join("assets/img").join(&asset.rel);
        Ok(Some(OriginalTarget { source, dest }))
    }

    fn source_path(&self, rel: &str) -> Result<PathBuf, PipelineError> {
        let source = self.config.image_dir().join(rel);
        if source.is_file() {
            Ok(source)
        } else {
            Err(PipelineError::SourceNotFound(source))
        }
    }

    fn raster_options(&self, theme: &Theme, width: u32) -> RasterOptions {
        RasterOptions {
            max_width: Some(width),
            bayer_size: self.config.bayer_size,
            palette: theme.palette,
            optimize: self.config.optimize_png,
        }
    }

    fn plan_tag(&self, tag: &str, main_width: u32) -> Option<TagPlan> {
        let src = get_attr(tag, "src")?;
        let variant = Variant::for_tag(tag);

        let target = match self.dither_target(&src, variant) {
            Ok(Some(target)) => target,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(%src, error = %e, "Image reference left untouched");
                return None;
            }
        };

        let (has_keyword, cleaned) = match get_attr(tag, "alt") {
            Some(alt) => strip_hover_keyword(&alt),
            None => (false, String::new()),
        };

        Some(TagPlan {
            target,
            width: variant.width(main_width),
            hover: has_keyword || has_attr(tag, HOVER_ATTR),
            cleaned_alt: has_keyword.then_some(cleaned),
        })
    }

    async fn rewrite(&self, cache: &BuildCache, html: &str) -> String {
        let theme = self.resolver.theme();
        let tags: Vec<&str> = img_tag_regex().find_iter(html).map(|m| m.as_str()).collect();
        let plans: Vec<Option<TagPlan>> = tags
            .iter()
            .map(|tag| self.plan_tag(tag, theme.main_width))
            .collect();

        let renders = plans.iter().map(|plan| async move {
            let plan = plan.as_ref()?;
            let options = self.raster_options(&theme, plan.width);
            match cache
                .ensure_dithered(&plan.target.source, &plan.target.dest, options)
                .await
            {
                Ok(_) => Some(true),
                Err(e) => {
                    tracing::error!(
                        source = %plan.target.source.display(),
                        error = %e,
                        "Failed to generate dithered image"
                    );
                    Some(false)
                }
            }
        });
        let outcomes = join_all(renders).await;

        // Failed renders keep their original reference, which must exist
        for (tag, outcome) in tags.iter().zip(&outcomes) {
            if *outcome == Some(false) {
                self.stage_original(cache, tag).await;
            }
        }

        let mut results = plans.into_iter().zip(outcomes);
        let rewritten = img_tag_regex().replace_all(html, |caps: &regex::Captures| {
            let tag = &caps[0];
            match results.next() {
                Some((Some(plan), Some(true))) => apply_plan(tag, &plan),
                _ => tag.to_string(),
            }
        });

        wrap_hover_images(&rewritten)
    }

    async fn stage_originals(&self, cache: &BuildCache, html: &str) {
        let tags: Vec<&str> = img_tag_regex().find_iter(html).map(|m| m.as_str()).collect();
        join_all(tags.into_iter().map(|tag| self.stage_original(cache, tag))).await;
    }

    async fn stage_original(&self, cache: &BuildCache, tag: &str) {
        let Some(src) = get_attr(tag, "src") else {
            return;
        };
        let target = match self.original_target(&src) {
            Ok(Some(target)) => target,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(%src, error = %e, "Original not staged");
                return;
            }
        };
        if let Err(e) = cache.ensure_copied(&target.source, &target.dest).await {
            tracing::error!(
                source = %target.source.display(),
                error = %e,
                "Failed to stage original image"
            );
        }
    }
}

fn apply_plan(tag: &str, plan: &TagPlan) -> String {
    let original_src = get_attr(tag, "src").unwrap_or_default();
    let mut out = set_attr(tag, "src", &plan.target.url);

    if plan.hover {
        out = set_attr(&out, HOVER_ATTR, "true");
        out = set_attr(&out, "data-dither-src", &plan.target.url);
        out = set_attr(&out, "data-original-src", &original_src);
        out = add_class(&out, HOVER_CLASS);
    }
    match plan.cleaned_alt.as_deref() {
        Some("") => out = remove_attr(&out, "alt"),
        Some(cleaned) => out = set_attr(&out, "alt", cleaned),
        None => {}
    }
    out
}
