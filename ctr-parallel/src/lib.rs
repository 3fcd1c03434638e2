// SPDX-License-Identifier: MIT
//! Bounded-concurrency job engine.
//!
//! A [`Controller`] holds the process-wide limit on concurrently running jobs.
//! It is created once at startup and shared by reference with every
//! [`Dispatcher`]; reconfiguring it never disturbs jobs that already hold a
//! permit.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ctr_parallel::{Context, Controller, Dispatcher};
//!
//! let controller = Arc::new(Controller::new());
//! controller.set_limit(4)?;
//! let dispatcher = Dispatcher::new(controller)?;
//!
//! let outcomes = dispatcher.dispatch_blocking(
//!     &Context::background(),
//!     vec!["ctr-a".to_string(), "ctr-b".to_string()],
//!     |id| stop_container(&id),
//! )?;
//! for (id, outcome) in &outcomes {
//!     if let Err(err) = outcome {
//!         eprintln!("{id}: {err}");
//!     }
//! }
//! ```

pub mod context;
pub mod controller;
pub mod error;
pub mod job_engine;
pub mod semaphore;

pub use context::{CancelCause, CancelHandle, Context};
pub use controller::{Controller, DEFAULT_MAX_THREADS};
pub use error::{JobError, Result};
pub use job_engine::closure_job::ClosureJob;
pub use job_engine::dispatcher::{Dispatcher, Outcomes};
pub use job_engine::job::{Job, JobHandle, JobState};
pub use semaphore::{Permit, Semaphore};
