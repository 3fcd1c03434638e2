// SPDX-License-Identifier: MIT

use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::{self, Either};
use log::info;

use crate::context::Context;
use crate::error::{JobError, Result};
use crate::semaphore::{Permit, Semaphore};

/// Limit used until the controller is reconfigured.
pub const DEFAULT_MAX_THREADS: usize = 8;

/// Owns the process-wide cap on concurrently running jobs.
///
/// Reconfiguring swaps in a fresh semaphore instead of resizing the current
/// one. Permits already granted keep pointing at the semaphore they came from
/// and are returned there.
#[derive(Debug)]
pub struct Controller {
    semaphore: RwLock<Arc<Semaphore>>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        let limit = NonZeroUsize::new(DEFAULT_MAX_THREADS).unwrap_or(NonZeroUsize::MIN);
        Self {
            semaphore: RwLock::new(Arc::new(Semaphore::new(limit))),
        }
    }

    pub fn with_limit(limit: usize) -> Result<Self> {
        Ok(Self {
            semaphore: RwLock::new(Arc::new(Semaphore::new(checked_limit(limit)?))),
        })
    }

    /// Replaces the concurrency limit. Zero is rejected and leaves the current
    /// limit in place.
    pub fn set_limit(&self, limit: usize) -> Result<()> {
        let limit = checked_limit(limit)?;
        let semaphore = Arc::new(Semaphore::new(limit));
        *self.semaphore.write().unwrap_or_else(PoisonError::into_inner) = semaphore;
        info!("Parallel job limit set to {limit}");
        Ok(())
    }

    pub fn limit(&self) -> usize {
        self.current_semaphore().weight()
    }

    /// Free permits on the current semaphore.
    pub fn available_permits(&self) -> usize {
        self.current_semaphore().available()
    }

    fn current_semaphore(&self) -> Arc<Semaphore> {
        self.semaphore
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits for a permit, giving up as soon as `ctx` finishes.
    pub async fn acquire(&self, ctx: &Context) -> Result<Permit> {
        if let Some(cause) = ctx.err() {
            return Err(JobError::Canceled(cause));
        }
        // the read lock is not held across the wait
        let semaphore = self.current_semaphore();
        let permit = Box::pin(semaphore.acquire());
        let finished = Box::pin(ctx.finished());
        match future::select(permit, finished).await {
            Either::Left((permit, _)) => Ok(permit),
            Either::Right((cause, _)) => Err(JobError::Canceled(cause)),
        }
    }
}

fn checked_limit(limit: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(limit).ok_or_else(|| {
        JobError::InvalidArgument(format!(
            "the number of parallel jobs must be positive (got {limit})"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelCause;
    use std::time::Duration;

    #[test]
    fn default_limit() {
        let controller = Controller::new();
        assert_eq!(controller.limit(), DEFAULT_MAX_THREADS);
        assert_eq!(controller.available_permits(), DEFAULT_MAX_THREADS);
    }

    #[test]
    fn zero_limit_is_rejected_and_keeps_previous() {
        let controller = Controller::with_limit(3).unwrap();
        let err = controller.set_limit(0).unwrap_err();
        assert!(matches!(err, JobError::InvalidArgument(_)));
        assert_eq!(controller.limit(), 3);
        assert!(matches!(
            Controller::with_limit(0),
            Err(JobError::InvalidArgument(_))
        ));
    }

    #[test]
    fn huge_limit_is_accepted() {
        let controller = Controller::new();
        controller.set_limit(usize::MAX).unwrap();
        assert_eq!(controller.limit(), usize::MAX);

        let permit = async_io::block_on(controller.acquire(&Context::background())).unwrap();
        assert_eq!(controller.available_permits(), usize::MAX - 1);
        drop(permit);
        assert_eq!(controller.available_permits(), usize::MAX);
    }

    #[test]
    fn set_limit_swaps_the_semaphore() {
        let controller = Controller::with_limit(1).unwrap();
        let ctx = Context::background();
        let old = async_io::block_on(controller.acquire(&ctx)).unwrap();
        assert_eq!(controller.available_permits(), 0);

        controller.set_limit(4).unwrap();
        assert_eq!(controller.limit(), 4);
        assert_eq!(controller.available_permits(), 4);

        // the old permit returns to the old semaphore, not the new one
        drop(old);
        assert_eq!(controller.available_permits(), 4);
    }

    #[test]
    fn acquire_on_finished_context_fails_without_a_permit() {
        let controller = Controller::with_limit(2).unwrap();
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let err = async_io::block_on(controller.acquire(&ctx)).unwrap_err();
        assert!(matches!(err, JobError::Canceled(CancelCause::Canceled)));
        assert_eq!(controller.available_permits(), 2);
    }

    #[test]
    fn acquire_times_out_while_waiting() {
        let controller = Controller::with_limit(1).unwrap();
        let _held = async_io::block_on(controller.acquire(&Context::background())).unwrap();
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let err = async_io::block_on(controller.acquire(&ctx)).unwrap_err();
        assert!(matches!(
            err,
            JobError::Canceled(CancelCause::DeadlineExceeded)
        ));
    }
}
