//! Filesystem event source for the watch directory.
//!
//! The `notify` watcher runs on its own thread. Its callback turns raw events
//! into "path appeared" signals and pushes them onto the pipeline channel
//! without waiting for the pipeline to act on them.

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Paths a single event reports as created in, or moved into, the directory.
pub fn discovered_paths(event: &Event) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .cloned()
            .collect(),
        // `Both` carries [from, to]; only the destination is new here.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .get(1)
            .filter(|p| !p.is_dir())
            .cloned()
            .into_iter()
            .collect(),
        // Some backends cannot tell the two ends of a rename apart.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event
            .paths
            .iter()
            .filter(|p| p.is_file())
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

/// Keeps the `notify` watcher alive for as long as it is held.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Watch `watch_dir` (non-recursive) and send discovered paths to `tx`.
    pub fn start(watch_dir: &Path, tx: mpsc::UnboundedSender<PathBuf>) -> Result<Self> {
        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        for path in discovered_paths(&event) {
                            info!(path = %path.display(), "Detected new file");
                            if tx.send(path).is_err() {
                                debug!("pipeline channel closed, dropping event");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "filesystem watcher error"),
                }
            })?;

        watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
        info!(path = %watch_dir.display(), "Watching directory");

        Ok(Self { _watcher: watcher })
    }
}
