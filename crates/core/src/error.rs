use thiserror::Error;

use crate::task::TaskPhase;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: TaskPhase, to: TaskPhase },
}

pub type Result<T> = std::result::Result<T, RelayError>;
