use thiserror::Error;

use crate::buckets::Bucket;

pub type SimResult<T> = std::result::Result<T, SimError>;

#[derive(Error, Debug)]
pub enum SimError {
    /// Frequency below one month, end before start, or a malformed period.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A weighting group has no proxy mass to divide by.
    #[error("Degenerate weighting in bucket {bucket}: {members} members with zero total size")]
    DegenerateWeighting { bucket: Bucket, members: usize },

    /// Carry-forward was requested before any portfolio existed.
    #[error("Fatal precondition: {0}")]
    FatalPrecondition(String),

    /// The report sink could not render or write a period.
    #[error("Report output failed: {0}")]
    Report(String),

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

impl SimError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub fn fatal_precondition(message: impl Into<String>) -> Self {
        Self::FatalPrecondition(message.into())
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            SimError::InvalidConfiguration(_) => 2,
            _ => 1,
        }
    }
}
