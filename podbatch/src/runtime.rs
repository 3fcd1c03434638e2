// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use std::process::{Command, Output};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use nix::sys::signal::Signal;
use serde::Deserialize;

use crate::container::{require_status, ContainerError, ContainerOps, ContainerStatus};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct StateOutput {
    id: String,
    status: ContainerStatus,
}

/// Drives containers through a `runc`-compatible command line.
#[derive(Debug, Clone)]
pub struct OciCliRuntime {
    binary: PathBuf,
    root: Option<PathBuf>,
    default_stop_timeout: Duration,
}

impl OciCliRuntime {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            root: None,
            default_stop_timeout: Duration::from_secs(10),
        }
    }

    /// State directory passed as `--root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.default_stop_timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(root) = &self.root {
            cmd.arg("--root").arg(root);
        }
        cmd
    }

    fn run(&self, action: &'static str, id: &str, args: &[&str]) -> Result<Output, ContainerError> {
        let mut cmd = self.command();
        cmd.args(args);
        debug!("Running {:?}", cmd);
        let output = cmd.output()?;
        if output.status.success() {
            return Ok(output);
        }
        let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if message.contains("does not exist") || message.contains("not found") {
            return Err(ContainerError::NotFound(id.to_string()));
        }
        Err(ContainerError::Runtime {
            action,
            id: id.to_string(),
            message,
        })
    }

    fn signal(&self, id: &str, signal: Signal) -> Result<(), ContainerError> {
        self.run("kill", id, &["kill", id, signal.as_str()])?;
        Ok(())
    }

    fn wait_stopped(&self, id: &str, timeout: Duration) -> Result<bool, ContainerError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.status(id)? == ContainerStatus::Stopped {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
    }
}

impl ContainerOps for OciCliRuntime {
    fn list(&self) -> Result<Vec<String>, ContainerError> {
        let output = self.run("list", "", &["list", "--format", "json"])?;
        // runc prints "null" when there are no containers
        let states: Option<Vec<StateOutput>> = serde_json::from_slice(&output.stdout)?;
        Ok(states
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.id)
            .collect())
    }

    fn status(&self, id: &str) -> Result<ContainerStatus, ContainerError> {
        let output = self.run("inspect", id, &["state", id])?;
        let state: StateOutput = serde_json::from_slice(&output.stdout)?;
        Ok(state.status)
    }

    fn stop(&self, id: &str, timeout: Option<Duration>) -> Result<(), ContainerError> {
        let status = self.status(id)?;
        if status == ContainerStatus::Stopped {
            return Err(ContainerError::Stopped(id.to_string()));
        }
        require_status(
            id,
            status,
            "stop",
            &[ContainerStatus::Created, ContainerStatus::Running],
        )?;
        let timeout = timeout.unwrap_or(self.default_stop_timeout);

        if !timeout.is_zero() {
            self.signal(id, Signal::SIGTERM)?;
            if self.wait_stopped(id, timeout)? {
                return Ok(());
            }
            warn!(
                "Timed out stopping container {id} after {}s, resorting to SIGKILL",
                timeout.as_secs()
            );
        }
        self.signal(id, Signal::SIGKILL)?;
        if !self.wait_stopped(id, self.default_stop_timeout)? {
            return Err(ContainerError::Runtime {
                action: "stop",
                id: id.to_string(),
                message: "container did not exit after SIGKILL".to_string(),
            });
        }
        Ok(())
    }

    fn kill(&self, id: &str, signal: Signal) -> Result<(), ContainerError> {
        require_status(id, self.status(id)?, "kill", &[ContainerStatus::Running])?;
        self.signal(id, signal)
    }

    fn pause(&self, id: &str) -> Result<(), ContainerError> {
        require_status(id, self.status(id)?, "pause", &[ContainerStatus::Running])?;
        self.run("pause", id, &["pause", id])?;
        Ok(())
    }

    fn unpause(&self, id: &str) -> Result<(), ContainerError> {
        require_status(id, self.status(id)?, "unpause", &[ContainerStatus::Paused])?;
        self.run("unpause", id, &["resume", id])?;
        Ok(())
    }

    fn cleanup(&self, id: &str) -> Result<(), ContainerError> {
        require_status(
            id,
            self.status(id)?,
            "clean up",
            &[ContainerStatus::Created, ContainerStatus::Stopped],
        )?;
        self.run("clean up", id, &["delete", id])?;
        Ok(())
    }
}
