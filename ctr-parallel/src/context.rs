// SPDX-License-Identifier: MIT

//! Cancellation contexts handed to permit acquisition.
//!
//! A [`Context`] finishes either when one of its cancel signals fires or when
//! its deadline passes. Child contexts inherit every signal and the earliest
//! deadline of their parent, so canceling a parent finishes all children.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use async_io::Timer;
use futures::future::{self, Either};

/// Why a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelCause {
    Canceled,
    DeadlineExceeded,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Canceled => f.write_str("context canceled"),
            CancelCause::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

// Nobody ever sends on the channel; closing it is the signal. The context keeps
// a sender of its own, so dropping every CancelHandle does not cancel.
#[derive(Debug)]
struct CancelSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl CancelSignal {
    fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self { tx, rx }
    }

    fn is_fired(&self) -> bool {
        self.tx.is_closed()
    }

    async fn fired(&self) {
        let _ = self.rx.recv().await;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    signals: Vec<Arc<CancelSignal>>,
    deadline: Option<Instant>,
}

/// Cancels the context it was created with, and every context derived from it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    signal: Arc<CancelSignal>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.signal.tx.close();
    }
}

impl Context {
    /// A context that never finishes.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let signal = Arc::new(CancelSignal::new());
        let mut child = self.clone();
        child.signals.push(signal.clone());
        (child, CancelHandle { signal })
    }

    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(inherited) => inherited.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the cause if the context has already finished.
    pub fn err(&self) -> Option<CancelCause> {
        if self.signals.iter().any(|s| s.is_fired()) {
            return Some(CancelCause::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context finishes, reporting why. Pending forever for a
    /// background context.
    pub async fn finished(&self) -> CancelCause {
        let canceled = async {
            if self.signals.is_empty() {
                future::pending::<()>().await;
            }
            let waits: Vec<_> = self.signals.iter().map(|s| Box::pin(s.fired())).collect();
            future::select_all(waits).await;
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => {
                    Timer::at(deadline).await;
                }
                None => future::pending::<()>().await,
            }
        };

        match future::select(Box::pin(canceled), Box::pin(expired)).await {
            Either::Left(_) => CancelCause::Canceled,
            Either::Right(_) => CancelCause::DeadlineExceeded,
        }
    }
}
