// SPDX-License-Identifier: MIT

use std::io;

use crate::context::CancelCause;

/// Errors produced by the job controller and dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A configuration value was rejected; the previous configuration stays in effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The batch context finished while a job was still waiting for a permit.
    #[error("acquiring job semaphore: {0}")]
    Canceled(CancelCause),

    /// The job's own operation failed.
    #[error(transparent)]
    Operation(anyhow::Error),

    #[error("failed to spawn job thread")]
    Spawn(#[source] io::Error),

    #[error("job dispatcher is closed")]
    DispatcherClosed,

    /// The job went away without reporting an outcome.
    #[error("job ended without reporting a result")]
    Lost,
}

impl JobError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobError::Canceled(_))
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
