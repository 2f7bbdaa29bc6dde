//! Error types for the ingest pipeline.

use std::path::PathBuf;

use relay_core::RelayError;
use relay_transport::DeliveryError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The source file disappeared before it could be delivered.
    #[error("source vanished: {}", .0.display())]
    Vanished(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("filesystem watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Core(#[from] RelayError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
