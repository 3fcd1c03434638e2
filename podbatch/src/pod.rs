// SPDX-License-Identifier: MIT

//! Pod-wide operations.
//!
//! Every container of a pod is handled independently: one job per container
//! goes through the shared [`Dispatcher`], and a failure on one container
//! never prevents the others from being processed. Containers that were
//! already in the requested state are skipped silently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ctr_parallel::{Context, Dispatcher, JobError, Outcomes};
use log::debug;
use nix::sys::signal::Signal;

use crate::container::{ContainerError, ContainerOps};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub name: String,
    pub containers: Vec<String>,
}

impl Pod {
    pub fn new(name: impl Into<String>, containers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            containers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodOp {
    Stop,
    Cleanup,
    Pause,
    Unpause,
    Kill,
}

impl PodOp {
    fn verb(&self) -> &'static str {
        match self {
            PodOp::Stop => "stop",
            PodOp::Cleanup => "clean up",
            PodOp::Pause => "pause",
            PodOp::Unpause => "unpause",
            PodOp::Kill => "kill",
        }
    }
}

impl fmt::Display for PodOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodOp::Stop => "stopping",
            PodOp::Cleanup => "cleaning up",
            PodOp::Pause => "pausing",
            PodOp::Unpause => "unpausing",
            PodOp::Kill => "killing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PodError {
    /// Some containers failed; maps container ID to its error.
    #[error("error {op} some containers of pod {pod}")]
    PartialFailure {
        pod: String,
        op: PodOp,
        errors: HashMap<String, anyhow::Error>,
    },

    #[error(transparent)]
    Job(#[from] JobError),
}

impl PodError {
    /// Per-container errors of a partial failure.
    pub fn container_errors(&self) -> Option<&HashMap<String, anyhow::Error>> {
        match self {
            PodError::PartialFailure { errors, .. } => Some(errors),
            PodError::Job(_) => None,
        }
    }
}

pub struct PodManager<R: ContainerOps> {
    runtime: Arc<R>,
    dispatcher: Arc<Dispatcher>,
}

impl<R: ContainerOps> PodManager<R> {
    pub fn new(runtime: Arc<R>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            runtime,
            dispatcher,
        }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Stops every container that is not stopped yet, optionally releasing
    /// its runtime resources afterwards. `timeout` of `None` uses the
    /// runtime's own default.
    pub fn stop(
        &self,
        ctx: &Context,
        pod: &Pod,
        timeout: Option<Duration>,
        cleanup: bool,
    ) -> Result<(), PodError> {
        self.for_each_container(ctx, pod, PodOp::Stop, move |runtime, id| {
            runtime.stop(id, timeout)?;
            if cleanup {
                runtime.cleanup(id)?;
            }
            Ok(())
        })
    }

    pub fn cleanup(&self, ctx: &Context, pod: &Pod) -> Result<(), PodError> {
        self.for_each_container(ctx, pod, PodOp::Cleanup, |runtime, id| runtime.cleanup(id))
    }

    pub fn pause(&self, ctx: &Context, pod: &Pod) -> Result<(), PodError> {
        self.for_each_container(ctx, pod, PodOp::Pause, |runtime, id| runtime.pause(id))
    }

    pub fn unpause(&self, ctx: &Context, pod: &Pod) -> Result<(), PodError> {
        self.for_each_container(ctx, pod, PodOp::Unpause, |runtime, id| runtime.unpause(id))
    }

    /// Sends `signal` to every running container.
    pub fn kill(&self, ctx: &Context, pod: &Pod, signal: Signal) -> Result<(), PodError> {
        self.for_each_container(ctx, pod, PodOp::Kill, move |runtime, id| {
            runtime.kill(id, signal)
        })
    }

    fn for_each_container<F>(
        &self,
        ctx: &Context,
        pod: &Pod,
        op: PodOp,
        f: F,
    ) -> Result<(), PodError>
    where
        F: Fn(&R, &str) -> Result<(), ContainerError> + Send + Sync + 'static,
    {
        for id in &pod.containers {
            debug!("Adding parallel job to {} container {id}", op.verb());
        }
        let runtime = self.runtime.clone();
        let outcomes =
            self.dispatcher
                .dispatch_blocking(ctx, pod.containers.iter().cloned(), move |id: String| {
                    f(runtime.as_ref(), id.as_str()).map_err(anyhow::Error::from)
                })?;
        collect_failures(pod, op, outcomes)
    }
}

fn collect_failures(pod: &Pod, op: PodOp, outcomes: Outcomes<String>) -> Result<(), PodError> {
    let errors: HashMap<String, anyhow::Error> = outcomes
        .into_iter()
        .filter_map(|(id, outcome)| outcome.err().map(|err| (id, err)))
        .filter(|(id, err)| match err.downcast_ref::<ContainerError>() {
            Some(ctr_err) if ctr_err.is_ignorable() => {
                debug!("Ignoring container {id} while {op} pod {}: {ctr_err}", pod.name);
                false
            }
            _ => true,
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(PodError::PartialFailure {
            pod: pod.name.clone(),
            op,
            errors,
        })
    }
}
