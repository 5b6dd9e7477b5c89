use thiserror::Error;

use super::Stage;
use crate::dispatch::DispatchError;
use crate::domain::FormulationError;

/// Abnormal run termination. Every variant ends the run in `FAILED`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("formulation rejected: {0}")]
    Formulation(#[from] FormulationError),
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("stage {stage} timed out after {timeout_ms} ms")]
    StageTimeout { stage: Stage, timeout_ms: u64 },
}
