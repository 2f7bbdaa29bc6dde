use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Lifecycle phase of a single ingestion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPhase {
    Discovered,
    AwaitingStability,
    Delivering,
    PostProcessing,
    Done,
    Failed,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Done | TaskPhase::Failed)
    }

    /// Whether `self -> next` is an edge of the task state machine.
    pub fn can_transition_to(self, next: TaskPhase) -> bool {
        use TaskPhase::*;
        matches!(
            (self, next),
            (Discovered, AwaitingStability)
                | (AwaitingStability, Delivering)
                | (AwaitingStability, Failed)
                | (Delivering, PostProcessing)
                | (Delivering, Failed)
                | (PostProcessing, Done)
        )
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::Discovered => write!(f, "Discovered"),
            TaskPhase::AwaitingStability => write!(f, "AwaitingStability"),
            TaskPhase::Delivering => write!(f, "Delivering"),
            TaskPhase::PostProcessing => write!(f, "PostProcessing"),
            TaskPhase::Done => write!(f, "Done"),
            TaskPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// One file moving through the pipeline, keyed by its canonical path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionTask {
    pub path: String,
    pub discovered_at: DateTime<Utc>,
    phase: TaskPhase,
}

impl IngestionTask {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            discovered_at: Utc::now(),
            phase: TaskPhase::Discovered,
        }
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub fn advance(&mut self, next: TaskPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(RelayError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!(path = %self.path, from = %self.phase, to = %next, "task phase change");
        self.phase = next;
        Ok(())
    }
}
