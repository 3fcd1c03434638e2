// SPDX-License-Identifier: MIT

//! Container and pod operations fanned out to an OCI runtime, with the number
//! of concurrent runtime invocations bounded by a [`ctr_parallel::Controller`].

pub mod cli;
pub mod config;
pub mod container;
pub mod pod;
pub mod runtime;

pub use config::{CliOverrides, EngineConfig};
pub use container::{parse_signal, ContainerError, ContainerOps, ContainerStatus};
pub use pod::{Pod, PodError, PodManager, PodOp};
pub use runtime::OciCliRuntime;
