// SPDX-License-Identifier: MIT

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use async_channel::Receiver;

use crate::error::{JobError, Result};

/// A unit of work run once a permit has been granted.
pub trait Job: Send + 'static {
    /// Free-form description, used for logging or debugging
    fn desc(&self) -> &str;

    /// Runs the job to completion on a dedicated thread.
    fn run(self: Box<Self>) -> anyhow::Result<()>;
}

impl std::fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("desc", &self.desc()).finish()
    }
}

/// Lifecycle of a single enqueued job.
///
/// The order is meaningful: a job only ever moves forward. `Canceled` is
/// reachable from `AcquiringPermit` only and sorts last, so it counts as
/// having passed every other state.
#[derive(Clone, Debug, Copy, PartialOrd, Ord, PartialEq, Eq)]
pub enum JobState {
    Pending,
    AcquiringPermit,
    Running,
    Completed,
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Canceled)
    }
}

#[derive(Debug)]
pub(crate) struct SyncState {
    state: Mutex<JobState>,
    cvar: Condvar,
}

impl SyncState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(JobState::Pending),
            cvar: Condvar::new(),
        })
    }

    pub(crate) fn set(&self, new_state: JobState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *current = new_state;
        self.cvar.notify_all();
    }

    fn get(&self) -> JobState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_for(&self, state: JobState) -> JobState {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *current < state {
            current = self
                .cvar
                .wait(current)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *current
    }
}

/// Handle to one enqueued job. Its outcome is delivered exactly once.
#[derive(Debug)]
pub struct JobHandle {
    desc: String,
    result_rx: Receiver<Result<()>>,
    sync_state: Arc<SyncState>,
}

impl JobHandle {
    pub(crate) fn new(
        desc: String,
        result_rx: Receiver<Result<()>>,
        sync_state: Arc<SyncState>,
    ) -> Self {
        Self {
            desc,
            result_rx,
            sync_state,
        }
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn state(&self) -> JobState {
        self.sync_state.get()
    }

    /// Blocks until the job has reached `state` or moved past it, and returns
    /// the state observed.
    pub fn wait_for_state(&self, state: JobState) -> JobState {
        self.sync_state.wait_for(state)
    }

    pub async fn result(self) -> Result<()> {
        self.result_rx.recv().await.unwrap_or(Err(JobError::Lost))
    }

    /// Blocking variant of [`JobHandle::result`].
    pub fn wait(self) -> Result<()> {
        self.result_rx.recv_blocking().unwrap_or(Err(JobError::Lost))
    }
}
