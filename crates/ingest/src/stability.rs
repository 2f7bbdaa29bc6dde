//! Write-stability detection.
//!
//! A file is stable once two consecutive size readings, one poll interval
//! apart, are equal and positive. Waiting is a cooperative sleep, so other
//! tasks keep running while a file settles.

use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Source of file sizes; swapped for a scripted probe in tests.
#[async_trait::async_trait]
pub trait SizeProbe: Send + Sync {
    async fn size(&self, path: &Path) -> io::Result<u64>;
}

/// Reads sizes from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

#[async_trait::async_trait]
impl SizeProbe for FsProbe {
    async fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityResult {
    pub stable: bool,
    /// Size readings taken.
    pub polls: u32,
    pub last_size: Option<u64>,
}

/// Poll `path` until its size settles or `max_polls` readings are used up.
///
/// Running out of polls is not an error: the result has `stable == false`.
/// A file that disappears returns [`IngestError::Vanished`].
pub async fn await_stable(
    path: &Path,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<StabilityResult> {
    await_stable_with(&FsProbe, path, poll_interval, max_polls).await
}

pub async fn await_stable_with(
    probe: &dyn SizeProbe,
    path: &Path,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<StabilityResult> {
    let mut previous: Option<u64> = None;

    for poll in 1..=max_polls {
        match probe.size(path).await {
            Ok(size) => {
                if previous == Some(size) && size > 0 {
                    debug!(path = %path.display(), size, polls = poll, "file size settled");
                    return Ok(StabilityResult {
                        stable: true,
                        polls: poll,
                        last_size: Some(size),
                    });
                }
                previous = Some(size);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(IngestError::Vanished(path.to_path_buf()));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read file size");
                previous = None;
            }
        }

        if poll < max_polls {
            tokio::time::sleep(poll_interval).await;
        }
    }

    Ok(StabilityResult {
        stable: false,
        polls: max_polls,
        last_size: previous,
    })
}
