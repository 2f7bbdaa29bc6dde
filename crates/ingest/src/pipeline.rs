//! Per-file ingestion pipeline.
//!
//! One call to [`IngestPipeline::handle_discovery`] drives one path through
//! `Discovered -> AwaitingStability -> Delivering -> PostProcessing -> Done`,
//! or into `Failed` when the file vanishes or delivery fails for good. The
//! dedup permit is taken before the first phase and dropped on every exit.
//!
//! [`IngestPipeline::run`] is the single consumer of the discovery channel:
//! it spawns one task per path and, on shutdown, lets in-flight tasks finish.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use relay_core::{DeliveryTarget, IngestionTask, RelocationPolicy, StabilitySettings, TaskPhase};
use relay_transport::{DeliveryReport, Deliverer};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dedup::{claim, PathLock};
use crate::error::{IngestError, Result};
use crate::finalize::{finalize, FinalizeResult};
use crate::stability::{await_stable_with, FsProbe, SizeProbe, StabilityResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnsupportedExtension,
    /// Missing by the time we looked, or not a regular file.
    NotAFile,
    AlreadyInFlight,
    /// Delivered earlier but could not be moved or deleted afterwards.
    AlreadyDelivered,
}

#[derive(Debug)]
pub struct TaskReport {
    pub task: IngestionTask,
    pub stability: StabilityResult,
    pub delivery: DeliveryReport,
    pub finalize: FinalizeResult,
}

#[derive(Debug)]
pub struct TaskFailure {
    pub task: IngestionTask,
    pub error: IngestError,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Ignored { path: PathBuf, reason: IgnoreReason },
    Done(TaskReport),
    Failed(TaskFailure),
}

impl TaskOutcome {
    /// Terminal phase of the task, `None` if no task was created.
    pub fn phase(&self) -> Option<TaskPhase> {
        match self {
            TaskOutcome::Ignored { .. } => None,
            TaskOutcome::Done(report) => Some(report.task.phase()),
            TaskOutcome::Failed(failure) => Some(failure.task.phase()),
        }
    }
}

/// Size + mtime of a file left behind after a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

pub struct IngestPipeline {
    lock: Arc<dyn PathLock>,
    deliverer: Deliverer,
    target: Arc<DeliveryTarget>,
    policy: RelocationPolicy,
    stability: StabilitySettings,
    probe: Arc<dyn SizeProbe>,
    /// Delivered files that are still in the watch directory, by canonical path.
    stranded: Mutex<HashMap<String, Fingerprint>>,
}

impl IngestPipeline {
    pub fn new(
        lock: Arc<dyn PathLock>,
        deliverer: Deliverer,
        target: Arc<DeliveryTarget>,
        policy: RelocationPolicy,
        stability: StabilitySettings,
    ) -> Self {
        Self {
            lock,
            deliverer,
            target,
            policy,
            stability,
            probe: Arc::new(FsProbe),
            stranded: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the filesystem size probe used by the stability gate.
    pub fn with_probe(mut self, probe: Arc<dyn SizeProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Process one "path appeared" signal to completion.
    pub async fn handle_discovery(&self, path: PathBuf) -> TaskOutcome {
        if !self.policy.accepts(&path) {
            info!(path = %path.display(), "Skipping file with unsupported extension");
            return TaskOutcome::Ignored {
                path,
                reason: IgnoreReason::UnsupportedExtension,
            };
        }

        let canonical = match tokio::fs::canonicalize(&path).await {
            Ok(p) => p,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "discovered path no longer resolvable");
                return TaskOutcome::Ignored {
                    path,
                    reason: IgnoreReason::NotAFile,
                };
            }
        };
        let meta = match tokio::fs::metadata(&canonical).await {
            Ok(meta) if meta.is_file() => meta,
            _ => {
                return TaskOutcome::Ignored {
                    path: canonical,
                    reason: IgnoreReason::NotAFile,
                };
            }
        };
        let key = canonical.to_string_lossy().into_owned();

        self.prune_stranded().await;
        if self.is_stranded(&key, &meta) {
            warn!(
                path = %key,
                "File was already delivered but could not be moved; not sending it again"
            );
            return TaskOutcome::Ignored {
                path: canonical,
                reason: IgnoreReason::AlreadyDelivered,
            };
        }

        let Some(_permit) = claim(&self.lock, &key) else {
            debug!(path = %key, "already in flight, ignoring duplicate signal");
            return TaskOutcome::Ignored {
                path: canonical,
                reason: IgnoreReason::AlreadyInFlight,
            };
        };

        let mut task = IngestionTask::new(key);
        info!(path = %task.path, "Preparing to upload");

        match self.drive(&mut task, &canonical).await {
            Ok((stability, delivery, finalize)) => TaskOutcome::Done(TaskReport {
                task,
                stability,
                delivery,
                finalize,
            }),
            Err(error) => {
                if let Err(e) = task.advance(TaskPhase::Failed) {
                    error!(path = %task.path, error = %e, "could not mark task failed");
                }
                match &error {
                    IngestError::Vanished(_) => {
                        info!(path = %task.path, "File vanished before upload, dropping task");
                    }
                    _ => {
                        error!(
                            path = %task.path,
                            error = %error,
                            "Failed to upload; source file left in place"
                        );
                    }
                }
                TaskOutcome::Failed(TaskFailure { task, error })
            }
        }
        // `_permit` drops here, clearing the in-flight marker.
    }

    async fn drive(
        &self,
        task: &mut IngestionTask,
        path: &Path,
    ) -> Result<(StabilityResult, DeliveryReport, FinalizeResult)> {
        task.advance(TaskPhase::AwaitingStability)?;
        let stability = await_stable_with(
            self.probe.as_ref(),
            path,
            self.stability.poll_interval,
            self.stability.max_polls,
        )
        .await?;
        if !stability.stable {
            warn!(
                path = %task.path,
                polls = stability.polls,
                "File may still be writing (proceeding anyway)"
            );
        }

        task.advance(TaskPhase::Delivering)?;
        let delivery = self
            .deliverer
            .deliver(&self.target, path, &self.policy.caption_template)
            .await?;

        task.advance(TaskPhase::PostProcessing)?;
        let finalize = finalize(path, &self.policy).await;
        if finalize.left_in_place() {
            self.mark_stranded(&task.path, path).await;
        } else {
            self.clear_stranded(&task.path);
        }

        task.advance(TaskPhase::Done)?;
        info!(path = %task.path, attempts = delivery.attempts, "Task complete");
        Ok((stability, delivery, finalize))
    }

    fn is_stranded(&self, key: &str, meta: &std::fs::Metadata) -> bool {
        let mut stranded = self.stranded.lock().expect("stranded map lock poisoned");
        match stranded.get(key) {
            Some(fp) if *fp == Fingerprint::of(meta) => true,
            Some(_) => {
                // Same name, new content: deliver it.
                stranded.remove(key);
                false
            }
            None => false,
        }
    }

    async fn mark_stranded(&self, key: &str, path: &Path) {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                self.stranded
                    .lock()
                    .expect("stranded map lock poisoned")
                    .insert(key.to_string(), Fingerprint::of(&meta));
            }
            Err(e) => debug!(path = %key, error = %e, "stranded file not readable, not recording"),
        }
    }

    /// Forget stranded files that are no longer on disk.
    async fn prune_stranded(&self) {
        let keys: Vec<String> = self
            .stranded
            .lock()
            .expect("stranded map lock poisoned")
            .keys()
            .cloned()
            .collect();
        for key in keys {
            if let Ok(false) = tokio::fs::try_exists(&key).await {
                debug!(path = %key, "stranded file removed from watch directory");
                self.clear_stranded(&key);
            }
        }
    }

    fn clear_stranded(&self, key: &str) {
        self.stranded
            .lock()
            .expect("stranded map lock poisoned")
            .remove(key);
    }

    /// Consume discovered paths until the channel closes or `shutdown` fires,
    /// then wait for every in-flight task to finish on its own.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<PathBuf>, shutdown: Arc<Notify>) {
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let stop = shutdown.notified();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("shutdown requested, no longer accepting new files");
                    break;
                }
                maybe_path = rx.recv() => match maybe_path {
                    Some(path) => {
                        let pipeline = Arc::clone(&self);
                        tasks.spawn(async move { pipeline.handle_discovery(path).await });
                    }
                    None => {
                        debug!("discovery channel closed");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::reap(joined);
                }
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "waiting for in-flight uploads to finish");
        }
        while let Some(joined) = tasks.join_next().await {
            Self::reap(joined);
        }
        info!("ingest pipeline stopped");
    }

    fn reap(joined: std::result::Result<TaskOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(outcome) => debug!(phase = ?outcome.phase(), "task finished"),
            Err(e) => error!(error = %e, "ingest task panicked"),
        }
    }
}
