//! Transport trait definition and shared error types.

use std::path::PathBuf;
use std::time::Duration;

use relay_core::DeliveryTarget;

use crate::progress::ProgressTracker;

/// Errors that can occur during file delivery.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The server-side file reference expired before the transfer completed.
    #[error("File reference expired before the transfer completed")]
    FileReferenceExpired,

    #[error("Delivery timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),
}

impl DeliveryError {
    /// Only an expired file reference is worth an automatic retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::FileReferenceExpired)
    }
}

/// A file ready to be sent.
#[derive(Debug, Clone)]
pub struct Upload {
    pub path: PathBuf,
    pub file_name: String,
    pub caption: String,
    pub size_bytes: u64,
}

/// Trait for delivery channel implementations.
#[async_trait::async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Resolve a channel identifier (`@username` or numeric id) to a target.
    async fn resolve_target(&self, channel: &str) -> Result<DeliveryTarget, DeliveryError>;

    /// Send the whole file to `target`, feeding `progress` as bytes go out.
    ///
    /// Every call starts the transfer from the beginning of the file.
    async fn send_file(
        &self,
        target: &DeliveryTarget,
        upload: &Upload,
        progress: &ProgressTracker,
    ) -> Result<(), DeliveryError>;

    /// Human-readable name for this channel (e.g., "telegram").
    fn transport_name(&self) -> &str;
}
