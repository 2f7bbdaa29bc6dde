//! Bounded-retry delivery wrapper.
//!
//! The deliverer renders the caption, wires up progress logging and hands
//! the file to a [`DeliveryTransport`]. An expired file reference earns
//! exactly one retry, restarted from byte zero; every other failure is
//! returned to the caller on the spot. Each attempt can be capped by an
//! optional timeout.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_core::DeliveryTarget;

use crate::caption::{render_caption, CaptionContext};
use crate::progress::ProgressTracker;
use crate::traits::{DeliveryError, DeliveryTransport, Upload};

/// First attempt plus the single retry for an expired file reference.
pub const MAX_ATTEMPTS: u32 = 2;

/// Outcome of a confirmed delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub attempts: u32,
    pub bytes: u64,
    pub duration_ms: u64,
    pub caption: String,
}

pub struct Deliverer {
    transport: Arc<dyn DeliveryTransport>,
    timeout: Option<Duration>,
}

impl Deliverer {
    pub fn new(transport: Arc<dyn DeliveryTransport>, timeout: Option<Duration>) -> Self {
        Self { transport, timeout }
    }

    /// Deliver `path` to `target`, labelled with `caption_template`.
    pub async fn deliver(
        &self,
        target: &DeliveryTarget,
        path: &Path,
        caption_template: &str,
    ) -> Result<DeliveryReport, DeliveryError> {
        let size_bytes = tokio::fs::metadata(path).await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let caption = render_caption(caption_template, &CaptionContext::new(&file_name, size_bytes));

        let upload = Upload {
            path: path.to_path_buf(),
            file_name: file_name.clone(),
            caption,
            size_bytes,
        };
        let progress = ProgressTracker::logging(file_name.clone(), size_bytes);

        let start = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            progress.reset();
            match self.attempt(target, &upload, &progress).await {
                Ok(()) => {
                    let duration_ms = start.elapsed().as_millis() as u64;
                    tracing::info!(
                        file = %file_name,
                        channel = self.transport.transport_name(),
                        attempts,
                        duration_ms,
                        "Upload complete"
                    );
                    return Ok(DeliveryReport {
                        attempts,
                        bytes: size_bytes,
                        duration_ms,
                        caption: upload.caption,
                    });
                }
                Err(e) if e.is_transient() && attempts < MAX_ATTEMPTS => {
                    tracing::warn!(file = %file_name, error = %e, "file reference expired, retrying once");
                }
                Err(e) => {
                    tracing::error!(
                        file = %file_name,
                        channel = self.transport.transport_name(),
                        attempts,
                        error = %e,
                        "Upload failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(
        &self,
        target: &DeliveryTarget,
        upload: &Upload,
        progress: &ProgressTracker,
    ) -> Result<(), DeliveryError> {
        let send = self.transport.send_file(target, upload, progress);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| DeliveryError::TimedOut(limit))?,
            None => send.await,
        }
    }
}
