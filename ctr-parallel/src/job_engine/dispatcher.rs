// SPDX-License-Identifier: MIT

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender};
use futures::executor::{LocalPool, LocalSpawner};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::task::LocalSpawnExt;
use log::{debug, info, warn};

use crate::context::Context;
use crate::controller::Controller;
use crate::error::{JobError, Result};
use crate::job_engine::closure_job::ClosureJob;
use crate::job_engine::job::{Job, JobHandle, JobState, SyncState};

/// Per-item outcomes of one [`Dispatcher::dispatch`] call.
pub type Outcomes<I> = HashMap<I, anyhow::Result<()>>;

struct QueuedJob {
    job: Box<dyn Job>,
    ctx: Context,
    result_tx: Sender<Result<()>>,
    sync_state: Arc<SyncState>,
}

impl QueuedJob {
    fn finish(&self, result: Result<()>, state: JobState) {
        self.sync_state.set(state);
        let _ = self.result_tx.try_send(result);
    }
}

/// Jobs that got a thread and have not reported their outcome yet.
#[derive(Debug, Default)]
struct RunningJobs {
    count: Mutex<usize>,
    idle: Condvar,
}

impl RunningJobs {
    fn begin(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn end(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Runs jobs with at most [`Controller::limit`] of them executing at once.
///
/// A background thread drives one acquisition task per queued job. A job only
/// gets an OS thread of its own after its permit was granted, so the number of
/// job threads never exceeds the limit.
pub struct Dispatcher {
    controller: Arc<Controller>,
    tx: Sender<QueuedJob>,
    running: Arc<RunningJobs>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("limit", &self.controller.limit())
            .field("queued", &self.tx.len())
            .field("running", &self.running.get())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(controller: Arc<Controller>) -> Result<Self> {
        let (tx, rx) = async_channel::unbounded();
        let loop_controller = controller.clone();
        let running = Arc::new(RunningJobs::default());
        let loop_running = running.clone();

        // run the acquisition loop in a dedicated thread
        let thread_handle = thread::Builder::new()
            .name("job-dispatcher".into())
            .spawn(move || {
                let mut pool = LocalPool::new();
                let spawner = pool.spawner();
                let main_loop =
                    dispatcher_loop(spawner.clone(), loop_controller, loop_running, rx);
                if let Err(e) = spawner.spawn_local(main_loop) {
                    warn!("Failed to start the job dispatcher loop: {e}");
                    return;
                }
                pool.run(); // blocks until all tasks complete
            })
            .map_err(JobError::Spawn)?;

        Ok(Self {
            controller,
            tx,
            running,
            thread_handle: Mutex::new(Some(thread_handle)),
        })
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Queues a job and returns immediately. The job waits for a permit under
    /// `ctx`; if `ctx` finishes first the handle reports [`JobError::Canceled`].
    pub fn enqueue(&self, ctx: &Context, job: Box<dyn Job>) -> JobHandle {
        let (result_tx, result_rx) = async_channel::bounded(1);
        let sync_state = SyncState::new();
        let handle = JobHandle::new(job.desc().to_string(), result_rx, sync_state.clone());

        debug!("Adding parallel job {}", job.desc());
        let queued = QueuedJob {
            job,
            ctx: ctx.clone(),
            result_tx,
            sync_state,
        };
        if let Err(e) = self.tx.try_send(queued) {
            e.into_inner()
                .finish(Err(JobError::DispatcherClosed), JobState::Completed);
        }
        handle
    }

    pub fn enqueue_fn<F>(&self, ctx: &Context, desc: impl Into<String>, f: F) -> JobHandle
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue(ctx, Box::new(ClosureJob::new(desc, f)))
    }

    /// Applies `op` to every distinct item and collects one outcome per item.
    ///
    /// Operation failures are recorded per item and never fail the batch. If
    /// `ctx` finishes while items are still waiting for permits, the call
    /// returns [`JobError::Canceled`] right away; items that already started
    /// run to completion in the background.
    pub async fn dispatch<I, F>(
        &self,
        ctx: &Context,
        items: impl IntoIterator<Item = I>,
        op: F,
    ) -> Result<Outcomes<I>>
    where
        I: Eq + Hash + Clone + Debug + Send + 'static,
        F: Fn(I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let mut seen = HashSet::new();
        let mut pending = FuturesUnordered::new();

        for item in items {
            if !seen.insert(item.clone()) {
                debug!("Skipping duplicate item {item:?}");
                continue;
            }
            let job_op = Arc::clone(&op);
            let job_item = item.clone();
            let handle = self.enqueue_fn(ctx, format!("{item:?}"), move || job_op(job_item));
            pending.push(async move { (item, handle.result().await) });
        }

        let mut outcomes = HashMap::with_capacity(pending.len());
        while let Some((item, result)) = pending.next().await {
            match result {
                Ok(()) => {
                    outcomes.insert(item, Ok(()));
                }
                Err(JobError::Operation(err)) => {
                    outcomes.insert(item, Err(err));
                }
                Err(err) => {
                    debug!("Aborting batch at item {item:?}: {err}");
                    return Err(err);
                }
            }
        }
        Ok(outcomes)
    }

    /// Blocking variant of [`Dispatcher::dispatch`].
    pub fn dispatch_blocking<I, F>(
        &self,
        ctx: &Context,
        items: impl IntoIterator<Item = I>,
        op: F,
    ) -> Result<Outcomes<I>>
    where
        I: Eq + Hash + Clone + Debug + Send + 'static,
        F: Fn(I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        async_io::block_on(self.dispatch(ctx, items, op))
    }

    /// Stops accepting jobs. Jobs already queued still run.
    pub fn close(&self) {
        self.tx.close();
        debug!("Job dispatcher closed");
    }

    /// Closes the dispatcher and waits until every queued job either gave up
    /// waiting for its permit or ran to completion, including jobs whose batch
    /// was already abandoned.
    pub fn wait_until_finished(&self) {
        self.close();
        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Job dispatcher thread panicked");
            }
        }
        self.running.wait_idle();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.tx.close();
    }
}

/// Receives queued jobs and spawns one acquisition task per job.
async fn dispatcher_loop(
    spawner: LocalSpawner,
    controller: Arc<Controller>,
    running: Arc<RunningJobs>,
    rx: Receiver<QueuedJob>,
) {
    while let Ok(queued) = rx.recv().await {
        let task = start_job(controller.clone(), running.clone(), queued);
        if let Err(e) = spawner.spawn_local(task) {
            warn!("Failed to schedule job: {e}");
        }
    }
    info!("Job dispatcher shutting down gracefully");
}

async fn start_job(controller: Arc<Controller>, running: Arc<RunningJobs>, queued: QueuedJob) {
    queued.sync_state.set(JobState::AcquiringPermit);
    let permit = match controller.acquire(&queued.ctx).await {
        Ok(permit) => permit,
        Err(err) => {
            debug!("Giving up on job {}: {err}", queued.job.desc());
            let state = if err.is_cancellation() {
                JobState::Canceled
            } else {
                JobState::Completed
            };
            queued.finish(Err(err), state);
            return;
        }
    };

    let QueuedJob {
        job,
        result_tx,
        sync_state,
        ..
    } = queued;
    let desc = job.desc().to_string();
    debug!("Starting job {desc}");
    sync_state.set(JobState::Running);

    let report_tx = result_tx.clone();
    let report_state = sync_state.clone();
    let job_running = running.clone();
    running.begin();
    let spawned = thread::Builder::new()
        .name("parallel-job".into())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()));
            drop(permit);
            let result = match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(JobError::Operation(err)),
                Err(payload) => Err(JobError::Operation(anyhow::anyhow!(
                    "job panicked: {}",
                    panic_message(payload.as_ref())
                ))),
            };
            sync_state.set(JobState::Completed);
            let _ = result_tx.try_send(result);
            job_running.end();
        });

    if let Err(err) = spawned {
        warn!("Failed to spawn thread for job {desc}: {err}");
        report_state.set(JobState::Completed);
        let _ = report_tx.try_send(Err(JobError::Spawn(err)));
        running.end();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
