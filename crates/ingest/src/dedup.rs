//! Single-flight guard keyed by canonical path.
//!
//! [`PathLock`] is the seam: the in-process [`DedupGuard`] can be replaced by
//! a distributed lock without touching the pipeline. [`claim`] wraps a
//! successful acquire in an [`InFlight`] permit that releases on drop, so
//! every exit path of a task gives the marker back exactly once.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Mutual exclusion per path. No fairness or ordering guarantees.
pub trait PathLock: Send + Sync {
    /// Mark `path` active. Returns false if it already is.
    fn acquire(&self, path: &str) -> bool;

    /// Clear the marker for `path`, whether or not it was set.
    fn release(&self, path: &str);

    fn is_active(&self, path: &str) -> bool;
}

/// In-memory [`PathLock`] over a mutex-guarded set.
#[derive(Debug, Default)]
pub struct DedupGuard {
    active: Mutex<HashSet<String>>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths currently in flight.
    pub fn len(&self) -> usize {
        self.active.lock().expect("dedup set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PathLock for DedupGuard {
    fn acquire(&self, path: &str) -> bool {
        self.active
            .lock()
            .expect("dedup set lock poisoned")
            .insert(path.to_string())
    }

    fn release(&self, path: &str) {
        self.active
            .lock()
            .expect("dedup set lock poisoned")
            .remove(path);
    }

    fn is_active(&self, path: &str) -> bool {
        self.active
            .lock()
            .expect("dedup set lock poisoned")
            .contains(path)
    }
}

/// Held for the lifetime of one task; releases the path when dropped.
pub struct InFlight {
    lock: Arc<dyn PathLock>,
    path: String,
}

impl InFlight {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight").field("path", &self.path).finish()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.lock.release(&self.path);
        tracing::trace!(path = %self.path, "released in-flight marker");
    }
}

/// Acquire `path` on `lock`, returning a permit, or `None` if it is taken.
pub fn claim(lock: &Arc<dyn PathLock>, path: &str) -> Option<InFlight> {
    if lock.acquire(path) {
        Some(InFlight {
            lock: Arc::clone(lock),
            path: path.to_string(),
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn second_acquire_rejected_until_release() {
        let guard = DedupGuard::new();
        assert!(guard.acquire("/watch/a.mkv"));
        assert!(!guard.acquire("/watch/a.mkv"));
        assert!(guard.acquire("/watch/b.mkv"));
        guard.release("/watch/a.mkv");
        assert!(guard.acquire("/watch/a.mkv"));
    }

    #[test]
    fn release_is_unconditional() {
        let guard = DedupGuard::new();
        guard.release("/never/acquired");
        assert!(guard.is_empty());
    }

    #[test]
    fn permit_releases_on_drop() {
        let lock: Arc<dyn PathLock> = Arc::new(DedupGuard::new());
        {
            let permit = claim(&lock, "/watch/a.mkv").expect("first claim wins");
            assert_eq!(permit.path(), "/watch/a.mkv");
            assert!(lock.is_active("/watch/a.mkv"));
            assert!(claim(&lock, "/watch/a.mkv").is_none());
        }
        assert!(!lock.is_active("/watch/a.mkv"));
    }

    #[test]
    fn concurrent_acquire_has_one_winner() {
        const THREADS: usize = 16;
        let guard = DedupGuard::new();
        let barrier = Barrier::new(THREADS);
        let winners = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    if guard.acquire("/watch/same.mkv") {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(guard.len(), 1);
    }
}
