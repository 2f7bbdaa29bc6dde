//! Watched-directory ingestion pipeline.
//!
//! Files that appear in the watch directory are checked against the
//! extension filter, claimed by the dedup guard, given time to finish
//! being written, delivered through a [`relay_transport::Deliverer`] and
//! finally archived or deleted.

pub mod dedup;
pub mod error;
pub mod finalize;
pub mod pipeline;
pub mod stability;
pub mod watcher;

pub use dedup::{claim, DedupGuard, InFlight, PathLock};
pub use error::IngestError;
pub use finalize::{finalize, FinalizeResult};
pub use pipeline::{IgnoreReason, IngestPipeline, TaskFailure, TaskOutcome, TaskReport};
pub use stability::{await_stable, await_stable_with, FsProbe, SizeProbe, StabilityResult};
pub use watcher::{discovered_paths, DirectoryWatcher};
