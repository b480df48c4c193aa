//! Extraction orchestrator.
//!
//! Drives one document through normalize → classify → extract → reconcile as
//! an explicit state machine. Runs are independent; they share only the
//! read-only config, the classifier and the inference pool.

pub mod state;
pub mod retry;
pub mod merge;
pub mod runner;
pub mod batch;
pub mod stats;

pub use state::*;
pub use retry::*;
pub use merge::*;
pub use runner::*;
pub use batch::*;
pub use stats::*;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::agents::AgentError;
use crate::pipeline::normalize::NormalizeError;

/// Pipeline stage a run was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalizing,
    Classifying,
    Extracting,
    Reconciling,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normalizing => "normalizing",
            Self::Classifying => "classifying",
            Self::Extracting => "extracting",
            Self::Reconciling => "reconciling",
        }
    }

    /// The stage a run in `state` is working on.
    pub fn following(state: RunState) -> Self {
        match state {
            RunState::Received => Self::Normalizing,
            RunState::Normalized => Self::Classifying,
            RunState::Classified | RunState::Extracting => Self::Extracting,
            RunState::Reconciled | RunState::Done | RunState::Failed => Self::Reconciling,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum FailureCause {
    #[error(transparent)]
    Normalize(NormalizeError),

    #[error(transparent)]
    Extraction(AgentError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Terminal failure of a run.
#[derive(Error, Debug)]
#[error("Run {run_id} failed while {stage}: {cause}")]
pub struct PipelineError {
    pub run_id: Uuid,
    pub stage: Stage,
    #[source]
    pub cause: FailureCause,
}

impl PipelineError {
    pub fn new(run_id: Uuid, stage: Stage, cause: impl Into<FailureCause>) -> Self {
        Self {
            run_id,
            stage,
            cause: cause.into(),
        }
    }

    pub fn cancelled(run_id: Uuid, stage: Stage) -> Self {
        Self::new(run_id, stage, FailureCause::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, FailureCause::Cancelled)
    }
}

impl From<NormalizeError> for FailureCause {
    fn from(e: NormalizeError) -> Self {
        match e {
            NormalizeError::Cancelled => Self::Cancelled,
            other => Self::Normalize(other),
        }
    }
}

impl From<AgentError> for FailureCause {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Cancelled => Self::Cancelled,
            other => Self::Extraction(other),
        }
    }
}
