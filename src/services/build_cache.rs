//! Per-build memo of what the pipeline has already produced.
//!
//! One `BuildCache` lives for one build invocation (a CLI build, a server
//! process, or one dev-mode rebuild). It only ever remembers files that
//! exist on disk, so dropping it costs a few `stat` calls on the next run
//! and never a re-render.

use crate::error::PipelineError;
use crate::rendering::{render_to_file, RasterOptions};
use crate::services::front_matter::parse_front_matter;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;
use tokio::sync::OnceCell;

/// What `ensure_*` did for a target path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The file was already there
    Present,
    /// This call produced the file
    Produced,
}

type InFlight = Mutex<HashMap<PathBuf, Arc<OnceCell<()>>>>;

#[derive(Default)]
pub struct BuildCache {
    generated: Mutex<HashSet<PathBuf>>,
    copied: Mutex<HashSet<PathBuf>>,
    front_matter: Mutex<HashMap<String, Option<Map<String, Value>>>>,
    in_flight: InFlight,
    renders: AtomicUsize,
    copies: AtomicUsize,
}

/// `(size in bytes, whole milliseconds since the epoch)` of a file
pub fn file_fingerprint(meta: &Metadata) -> (u64, u128) {
    let mtime_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);
    (meta.len(), mtime_ms)
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a dithered rendition of `source` exists at `dest`.
    ///
    /// Skips work when the output is known or already on disk. Concurrent
    /// calls for the same `dest` share a single render.
    pub async fn ensure_dithered(
        &self,
        source: &Path,
        dest: &Path,
        options: RasterOptions,
    ) -> Result<EnsureOutcome, PipelineError> {
        if self.known(&self.generated, dest) {
            return Ok(EnsureOutcome::Present);
        }

        let source = source.to_path_buf();
        let target = dest.to_path_buf();
        let produced = self
            .run_once(dest, || async move {
                self.renders.fetch_add(1, Ordering::Relaxed);
                render_to_file(source, target, options).await
            })
            .await?;

        lock(&self.generated).insert(dest.to_path_buf());
        if produced {
            tracing::info!(path = %dest.display(), "Generated dithered image");
        }
        Ok(if produced {
            EnsureOutcome::Produced
        } else {
            EnsureOutcome::Present
        })
    }

    /// Make sure an untouched copy of `source` exists at `dest`
    pub async fn ensure_copied(
        &self,
        source: &Path,
        dest: &Path,
    ) -> Result<EnsureOutcome, PipelineError> {
        if self.known(&self.copied, dest) {
            return Ok(EnsureOutcome::Present);
        }

        let produced = self
            .run_once(dest, || async move {
                self.copies.fetch_add(1, Ordering::Relaxed);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(source, dest).await?;
                Ok(())
            })
            .await?;

        lock(&self.copied).insert(dest.to_path_buf());
        if produced {
            tracing::info!(path = %dest.display(), "Staged original image");
        }
        Ok(if produced {
            EnsureOutcome::Produced
        } else {
            EnsureOutcome::Present
        })
    }

    /// Front matter of a page source, cached by path, size and mtime
    pub fn front_matter(&self, path: &Path) -> Option<Map<String, Value>> {
        let meta = std::fs::metadata(path).ok()?;
        let (size, mtime_ms) = file_fingerprint(&meta);
        let key = format!("{}|{size}|{mtime_ms}", path.display());

        if let Some(cached) = lock(&self.front_matter).get(&key) {
            return cached.clone();
        }

        let parsed = match std::fs::read_to_string(path) {
            Ok(content) => parse_front_matter(&content),
            Err(e) => {
                tracing::debug!(error = %e, path = %path.display(), "Cannot read page source");
                None
            }
        };
        lock(&self.front_matter).insert(key, parsed.clone());
        parsed
    }

    /// Number of renders started through this cache
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }

    /// Number of original copies started through this cache
    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::Relaxed)
    }

    fn known(&self, set: &Mutex<HashSet<PathBuf>>, dest: &Path) -> bool {
        if lock(set).contains(dest) {
            return true;
        }
        if dest.exists() {
            lock(set).insert(dest.to_path_buf());
            return true;
        }
        false
    }

    /// Run `work` at most once per path among concurrent callers.
    ///
    /// Returns whether this caller did the work; callers that joined a run
    /// already in progress get `false`. A failed run leaves nothing behind,
    /// so a later call tries again.
    async fn run_once<F, Fut>(&self, dest: &Path, work: F) -> Result<bool, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), PipelineError>>,
    {
        let cell = lock(&self.in_flight)
            .entry(dest.to_path_buf())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut ran = false;
        let result = cell
            .get_or_try_init(|| {
                ran = true;
                work()
            })
            .await
            .map(|_| ());

        {
            let mut in_flight = lock(&self.in_flight);
            if in_flight.get(dest).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                in_flight.remove(dest);
            }
        }

        result.map(|_| ran)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
