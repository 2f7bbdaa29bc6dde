//! Upload progress reporting.
//!
//! The tracker only fires its callback when the integer percentage of bytes
//! transferred changes. It is observability only; nothing in the delivery
//! path depends on it.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// A single progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub percent: u8,
    pub transferred: u64,
    pub total: u64,
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

struct Inner {
    total: u64,
    transferred: AtomicU64,
    last_percent: AtomicI64,
    callback: ProgressCallback,
}

/// Cheaply cloneable progress counter shared with the upload body stream.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl ProgressTracker {
    pub fn new(total: u64, callback: ProgressCallback) -> Self {
        Self {
            inner: Arc::new(Inner {
                total,
                transferred: AtomicU64::new(0),
                last_percent: AtomicI64::new(-1),
                callback,
            }),
        }
    }

    /// Tracker that logs `Uploading <name>: N% (x/y bytes)` at info level.
    pub fn logging(file_name: impl Into<String>, total: u64) -> Self {
        let file_name = file_name.into();
        Self::new(
            total,
            Arc::new(move |p: Progress| {
                tracing::info!(
                    "Uploading {}: {}% ({}/{} bytes)",
                    file_name,
                    p.percent,
                    p.transferred,
                    p.total
                );
            }),
        )
    }

    /// Tracker that reports nothing.
    pub fn silent(total: u64) -> Self {
        Self::new(total, Arc::new(|_| {}))
    }

    /// Record `bytes` more transferred.
    pub fn advance(&self, bytes: u64) {
        let inner = &self.inner;
        let transferred = inner.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if inner.total == 0 {
            return;
        }
        let transferred = transferred.min(inner.total);
        let percent = (transferred * 100 / inner.total) as i64;
        let previous = inner.last_percent.swap(percent, Ordering::Relaxed);
        if previous != percent {
            (inner.callback)(Progress {
                percent: percent as u8,
                transferred,
                total: inner.total,
            });
        }
    }

    /// Start over for a restarted transfer.
    pub fn reset(&self) {
        self.inner.transferred.store(0, Ordering::Relaxed);
        self.inner.last_percent.store(-1, Ordering::Relaxed);
    }

    pub fn transferred(&self) -> u64 {
        self.inner.transferred.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("total", &self.inner.total)
            .field("transferred", &self.transferred())
            .finish()
    }
}
