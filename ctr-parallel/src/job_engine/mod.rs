// SPDX-License-Identifier: MIT
//! # Design: Bounded Parallel Job Executor
//!
//! ## Overview
//! Fans an operation out over many items (usually containers) while keeping
//! the number of operations executing at the same time below the controller's
//! limit.
//!
//! - `enqueue` returns a `JobHandle` immediately; the outcome arrives on a
//!   one-shot channel once the job finished or gave up.
//! - A single dispatcher thread runs one acquisition task per queued job on a
//!   local pool. Acquisition races the job's `Context`.
//! - A job that got its permit runs on its own thread and releases the permit
//!   as soon as its operation returns, whatever the outcome.
//! - `dispatch` is built on `enqueue` and gathers the handles out of order into
//!   a per-item outcome map.
//!
//! ```text
//!       +--------------------------------+
//!       | Dispatcher (enqueue, dispatch) |
//!       +---------------+----------------+
//!                       | unbounded channel
//!                       v
//!       +---------------+----------------+
//!       | dispatcher thread (LocalPool)  |
//!       | acquire(ctx) per queued job    |
//!       +---+------------+-----------+---+
//!           | permit     | permit    | canceled -> handle
//!       +---v----+   +---v----+
//!       | job    |   | job    |   <= limit threads
//!       | thread |   | thread |
//!       +--------+   +--------+
//! ```
//!
//! ## Job states
//! `Pending -> AcquiringPermit -> Running -> Completed`, or
//! `AcquiringPermit -> Canceled` when the context finishes first. There is no
//! retry; callers decide whether to enqueue again.

pub mod closure_job;
pub mod dispatcher;
pub mod job;

#[cfg(test)]
mod tests;
