//! Whole-site pass: run the transform over every generated page in place.

use crate::models::PageContext;
use crate::rendering::write_atomic;
use crate::services::build_cache::BuildCache;
use crate::services::transform::DitherTransform;
use futures_util::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Summary of one site pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub pages: usize,
    pub rewritten: usize,
    pub failed: usize,
}

pub struct SiteBuilder {
    transform: Arc<DitherTransform>,
}

impl SiteBuilder {
    pub fn new(transform: Arc<DitherTransform>) -> Self {
        Self { transform }
    }

    /// Transform every `.html` file below the output directory.
    ///
    /// Pages are processed `concurrency` at a time and share `cache`.
    pub async fn build(&self, cache: &BuildCache) -> std::io::Result<BuildReport> {
        let config = self.transform.config();
        let root = config.output_dir();
        let pages = html_files(&root)?;
        tracing::info!(output = %root.display(), pages = pages.len(), "Transforming pages");

        // Each page future owns its path and transform handle
        let results: Vec<Result<bool, String>> = stream::iter(pages.clone())
            .map(|page| build_page(self.transform.clone(), cache, page))
            .buffer_unordered(config.concurrency.max(1))
            .collect()
            .await;

        let mut report = BuildReport {
            pages: pages.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(true) => report.rewritten += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Page transform failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            pages = report.pages,
            rewritten = report.rewritten,
            failed = report.failed,
            renders = cache.render_count(),
            "Site build complete"
        );
        Ok(report)
    }
}

async fn build_page(
    transform: Arc<DitherTransform>,
    cache: &BuildCache,
    page: PathBuf,
) -> Result<bool, String> {
    let html = tokio::fs::read_to_string(&page)
        .await
        .map_err(|e| format!("{}: {e}", page.display()))?;

    let out = transform
        .transform(cache, &html, &page, &PageContext::default())
        .await;
    if out == html {
        return Ok(false);
    }

    let target = page.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, out.as_bytes()))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| format!("{}: {e}", page.display()))?;
    tracing::debug!(page = %page.display(), "Rewrote page");
    Ok(true)
}

/// All `.html` files below `root`, sorted; a missing root yields none
pub fn html_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !root.is_dir() {
        return Ok(found);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "html") {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}
