//! The three ordered deliberation stages and their completion policies.

use crate::session::worker::{WorkerState, WorkerStatus};
use serde::{Deserialize, Serialize};

/// One of the three ordered stages of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Independent drafting by the worker panel.
    Draft,
    /// Anonymous peer ranking of the drafts.
    Rank,
    /// Chairman synthesis of one authoritative reply.
    Synth,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Draft, StageId::Rank, StageId::Synth];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Draft => "draft",
            StageId::Rank => "rank",
            StageId::Synth => "synth",
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(&self) -> Option<StageId> {
        match self {
            StageId::Draft => Some(StageId::Rank),
            StageId::Rank => Some(StageId::Synth),
            StageId::Synth => None,
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry-level status of one stage.
///
/// `Cancelled` is terminal like `Failed` but distinguishes a user or
/// timeout stop from a stage that missed its minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotStarted,
    InProgress,
    Complete,
    Degraded,
    Failed,
    Cancelled,
}

impl StageStatus {
    /// A stage in this status allows the next stage to begin.
    pub fn allows_advance(&self) -> bool {
        matches!(self, StageStatus::Complete | StageStatus::Degraded)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::NotStarted | StageStatus::InProgress)
    }
}

/// Completion policy for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePolicy {
    /// Stage completes when every worker has terminated; `Complete` if all
    /// finished done, `Degraded` if at least `min` did, `Failed` otherwise.
    AllOrDegraded { min: usize },
    /// Exactly one mandatory worker; `Complete` iff it finished done.
    Single,
}

impl StagePolicy {
    /// Judge a finished stage from its per-worker done count.
    pub fn judge(&self, done: usize, total: usize) -> StageStatus {
        match self {
            StagePolicy::AllOrDegraded { min } => {
                if done == total && total > 0 {
                    StageStatus::Complete
                } else if done >= *min {
                    StageStatus::Degraded
                } else {
                    StageStatus::Failed
                }
            }
            StagePolicy::Single => {
                if done == 1 {
                    StageStatus::Complete
                } else {
                    StageStatus::Failed
                }
            }
        }
    }
}

/// State of one stage entry inside a session: participating workers plus
/// the entry-level status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    id: StageId,
    status: StageStatus,
    workers: Vec<WorkerState>,
}

impl StageState {
    pub fn new(id: StageId) -> Self {
        Self {
            id,
            status: StageStatus::NotStarted,
            workers: Vec::new(),
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn workers(&self) -> &[WorkerState] {
        &self.workers
    }

    pub fn begin(&mut self, workers: Vec<WorkerState>) {
        self.workers = workers;
        self.status = StageStatus::InProgress;
    }

    pub fn set_status(&mut self, status: StageStatus) {
        self.status = status;
    }

    pub fn worker_mut(&mut self, role: &crate::session::worker::WorkerRole) -> Option<&mut WorkerState> {
        self.workers.iter_mut().find(|w| w.role() == role)
    }

    /// Roles that terminated in `error` or `cancelled`.
    pub fn lost_roles(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter(|w| matches!(w.status(), WorkerStatus::Error | WorkerStatus::Cancelled))
            .map(|w| w.role().to_string())
            .collect()
    }

    pub fn done_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.status() == WorkerStatus::Done)
            .count()
    }
}
