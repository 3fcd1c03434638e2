// SPDX-License-Identifier: MIT

//! In-memory [`ContainerOps`] backend for exercising the pod layer without an
//! OCI runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use nix::sys::signal::Signal;
use podbatch::container::{require_status, ContainerError, ContainerOps, ContainerStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub action: &'static str,
    pub id: String,
}

/// Tracks how many operations run at the same time. Several runtimes can
/// share one gauge.
#[derive(Debug, Default)]
pub struct Gauge {
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest number of operations that ran at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.live)
    }
}

/// Counts an operation as in flight while alive.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    containers: Mutex<BTreeMap<String, ContainerStatus>>,
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<Call>>,
    delay: Duration,
    gauge: Arc<Gauge>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, id: &str, status: ContainerStatus) -> Self {
        self.containers.lock().unwrap().insert(id.to_string(), status);
        self
    }

    /// Every operation sleeps this long before touching state.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Counts operations on `gauge` instead of a private one.
    pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.gauge = gauge;
        self
    }

    /// Makes every operation on `id` fail with a runtime error.
    pub fn with_failure(self, id: &str, message: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(id.to_string(), message.to_string());
        self
    }

    pub fn status_of(&self, id: &str) -> Option<ContainerStatus> {
        self.containers.lock().unwrap().get(id).copied()
    }

    pub fn calls_for(&self, action: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.action == action)
            .count()
    }

    pub fn peak(&self) -> usize {
        self.gauge.peak()
    }

    fn enter(&self, action: &'static str, id: &str) -> Result<InFlight<'_>, ContainerError> {
        let guard = self.gauge.enter();
        self.calls.lock().unwrap().push(Call {
            action,
            id: id.to_string(),
        });
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if let Some(message) = self.failures.lock().unwrap().get(id) {
            return Err(ContainerError::Runtime {
                action,
                id: id.to_string(),
                message: message.clone(),
            });
        }
        Ok(guard)
    }

    fn transition(
        &self,
        id: &str,
        action: &'static str,
        allowed: &[ContainerStatus],
        next: Option<ContainerStatus>,
    ) -> Result<(), ContainerError> {
        let mut containers = self.containers.lock().unwrap();
        let status = containers
            .get(id)
            .copied()
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        require_status(id, status, action, allowed)?;
        match next {
            Some(next) => {
                containers.insert(id.to_string(), next);
            }
            None => {
                containers.remove(id);
            }
        }
        Ok(())
    }
}

impl ContainerOps for FakeRuntime {
    fn list(&self) -> Result<Vec<String>, ContainerError> {
        Ok(self.containers.lock().unwrap().keys().cloned().collect())
    }

    fn status(&self, id: &str) -> Result<ContainerStatus, ContainerError> {
        self.status_of(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    fn stop(&self, id: &str, _timeout: Option<Duration>) -> Result<(), ContainerError> {
        let _in_flight = self.enter("stop", id)?;
        if self.status(id)? == ContainerStatus::Stopped {
            return Err(ContainerError::Stopped(id.to_string()));
        }
        self.transition(
            id,
            "stop",
            &[ContainerStatus::Created, ContainerStatus::Running],
            Some(ContainerStatus::Stopped),
        )
    }

    fn kill(&self, id: &str, signal: Signal) -> Result<(), ContainerError> {
        let _in_flight = self.enter("kill", id)?;
        let next = match signal {
            Signal::SIGKILL | Signal::SIGTERM => ContainerStatus::Stopped,
            _ => ContainerStatus::Running,
        };
        self.transition(id, "kill", &[ContainerStatus::Running], Some(next))
    }

    fn pause(&self, id: &str) -> Result<(), ContainerError> {
        let _in_flight = self.enter("pause", id)?;
        self.transition(
            id,
            "pause",
            &[ContainerStatus::Running],
            Some(ContainerStatus::Paused),
        )
    }

    fn unpause(&self, id: &str) -> Result<(), ContainerError> {
        let _in_flight = self.enter("unpause", id)?;
        self.transition(
            id,
            "unpause",
            &[ContainerStatus::Paused],
            Some(ContainerStatus::Running),
        )
    }

    fn cleanup(&self, id: &str) -> Result<(), ContainerError> {
        let _in_flight = self.enter("cleanup", id)?;
        self.transition(
            id,
            "clean up",
            &[ContainerStatus::Created, ContainerStatus::Stopped],
            None,
        )
    }
}
