// SPDX-License-Identifier: MIT

use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

/// Container status as reported by an OCI runtime's `state` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The container exists but its status does not allow the operation.
    #[error("container {id} is {status}, cannot {action} it")]
    StateInvalid {
        id: String,
        status: ContainerStatus,
        action: &'static str,
    },

    #[error("container {0} is already stopped")]
    Stopped(String),

    #[error("no such container {0}")]
    NotFound(String),

    #[error("runtime failed to {action} container {id}: {message}")]
    Runtime {
        action: &'static str,
        id: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("failed to decode runtime output")]
    Decode(#[from] serde_json::Error),
}

impl ContainerError {
    /// Errors meaning "nothing to do for this container". Pod-wide operations
    /// skip them instead of reporting a failure.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            ContainerError::StateInvalid { .. } | ContainerError::Stopped(_)
        )
    }
}

/// Per-container operations the pod layer fans out in parallel.
pub trait ContainerOps: Send + Sync + 'static {
    /// IDs of all containers known to the backend.
    fn list(&self) -> Result<Vec<String>, ContainerError>;

    fn status(&self, id: &str) -> Result<ContainerStatus, ContainerError>;

    /// Sends SIGTERM, then SIGKILL once `timeout` expires. `None` uses the
    /// backend's default timeout.
    fn stop(&self, id: &str, timeout: Option<Duration>) -> Result<(), ContainerError>;

    fn kill(&self, id: &str, signal: Signal) -> Result<(), ContainerError>;

    fn pause(&self, id: &str) -> Result<(), ContainerError>;

    fn unpause(&self, id: &str) -> Result<(), ContainerError>;

    /// Releases the runtime resources of a container that is no longer running.
    fn cleanup(&self, id: &str) -> Result<(), ContainerError>;
}

/// Fails with [`ContainerError::StateInvalid`] unless `status` is one of `allowed`.
pub fn require_status(
    id: &str,
    status: ContainerStatus,
    action: &'static str,
    allowed: &[ContainerStatus],
) -> Result<(), ContainerError> {
    if allowed.contains(&status) {
        Ok(())
    } else {
        Err(ContainerError::StateInvalid {
            id: id.to_string(),
            status,
            action,
        })
    }
}

/// Parses `SIGKILL`, `KILL`, `kill` or `9`.
pub fn parse_signal(input: &str) -> anyhow::Result<Signal> {
    let input = input.trim();
    if let Ok(number) = input.parse::<i32>() {
        return Signal::try_from(number).with_context(|| format!("invalid signal number {number}"));
    }
    let name = input.to_ascii_uppercase();
    let name = if name.starts_with("SIG") {
        name
    } else {
        format!("SIG{name}")
    };
    Signal::from_str(&name).map_err(|_| anyhow!("invalid signal {input:?}"))
}
