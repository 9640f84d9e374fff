//! File watcher service for dev mode.
//!
//! Monitors source images, the theme stylesheet and the generated pages,
//! broadcasting debounced change events so the site can be rebuilt.

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Extensions whose changes can affect the build output
const WATCHED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "css", "html"];

/// Event sent when files change
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// Paths that changed
    pub paths: Vec<PathBuf>,
}

/// File watcher over a set of directories
pub struct FileWatcher {
    sender: broadcast::Sender<FileChangeEvent>,
    _watcher: Option<RecommendedWatcher>,
    active: bool,
}

impl FileWatcher {
    /// Start watching every existing path in `watch_paths`.
    ///
    /// Must be called inside a tokio runtime. Paths that do not exist are
    /// skipped; with none left the watcher is inactive.
    pub fn new(watch_paths: &[PathBuf]) -> Self {
        let (sender, _) = broadcast::channel(16);

        let existing: Vec<&Path> = watch_paths
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| {
                let exists = p.exists();
                if !exists {
                    tracing::debug!(path = %p.display(), "Watch path does not exist");
                }
                exists
            })
            .collect();

        if existing.is_empty() {
            tracing::debug!("No watch paths available, file watching disabled");
            return Self {
                sender,
                _watcher: None,
                active: false,
            };
        }

        let (watcher, active) = match Self::start_watcher(&existing, sender.clone()) {
            Ok(watcher) => {
                tracing::info!(paths = ?existing, "File watcher started");
                (Some(watcher), true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start file watcher");
                (None, false)
            }
        };

        Self {
            sender,
            _watcher: watcher,
            active,
        }
    }

    fn start_watcher(
        paths: &[&Path],
        sender: broadcast::Sender<FileChangeEvent>,
    ) -> Result<RecommendedWatcher, notify::Error> {
        let (tx, mut rx) = mpsc::channel::<PathBuf>(100);

        tokio::spawn(async move {
            let pending: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));
            let pending_clone = pending.clone();

            let debounce_sender = sender.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(DEBOUNCE).await;
                    let mut guard = pending_clone.lock().await;
                    if !guard.is_empty() {
                        let paths: Vec<PathBuf> = guard.drain().collect();
                        tracing::debug!(paths = ?paths, "Files changed (debounced)");
                        let _ = debounce_sender.send(FileChangeEvent { paths });
                    }
                }
            });

            while let Some(path) = rx.recv().await {
                pending.lock().await.insert(path);
            }
        });

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    for path in event.paths.into_iter().filter(|p| is_watched(p)) {
                        let _ = tx.blocking_send(path);
                    }
                }
            },
            Config::default(),
        )?;

        for path in paths {
            let mode = if path.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher.watch(path, mode)?;
        }

        Ok(watcher)
    }

    /// Subscribe to file change events
    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.sender.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

fn is_watched(path: &Path) -> bool {
    // Our own temp files and renditions must not trigger rebuilds
    let hidden = path
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'));
    let rendition = path.components().any(|c| c.as_os_str() == "dither");

    !hidden
        && !rendition
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| WATCHED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}
