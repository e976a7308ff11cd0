use scout_core::CoreError;
use thiserror::Error;

use crate::resilience::TransportError;

/// Why a pipeline step did not complete.
#[derive(Error, Debug, Clone)]
pub enum RunError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("run cancelled")]
    Cancelled,
}

pub type RunResult<T> = std::result::Result<T, RunError>;
