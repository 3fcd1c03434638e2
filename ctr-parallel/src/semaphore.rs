// SPDX-License-Identifier: MIT

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use event_listener::Event;

/// Counting semaphore: an atomic count of free permits plus an event that
/// wakes waiters whenever a permit comes back.
///
/// Acquisition is cancel-safe. A dropped `acquire` future never holds a
/// permit, and a wake-up it did not consume is passed on to the next waiter,
/// so acquisition can race against a context without leaking permits.
#[derive(Debug)]
pub struct Semaphore {
    weight: NonZeroUsize,
    free: AtomicUsize,
    released: Event,
}

/// A granted permit. It goes back to its semaphore when dropped.
#[derive(Debug)]
pub struct Permit {
    semaphore: Arc<Semaphore>,
}

impl Semaphore {
    pub fn new(weight: NonZeroUsize) -> Self {
        Self {
            weight,
            free: AtomicUsize::new(weight.get()),
            released: Event::new(),
        }
    }

    pub fn weight(&self) -> usize {
        self.weight.get()
    }

    /// Number of permits currently free.
    pub fn available(&self) -> usize {
        self.free.load(Ordering::Acquire)
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut free = self.free.load(Ordering::Acquire);
        loop {
            if free == 0 {
                return None;
            }
            match self.free.compare_exchange_weak(
                free,
                free - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Permit {
                        semaphore: Arc::clone(self),
                    })
                }
                Err(current) => free = current,
            }
        }
    }

    pub async fn acquire(self: Arc<Self>) -> Permit {
        loop {
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            // register before the second check so a release in between is not missed
            let listener = self.released.listen();
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            listener.await;
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.free.fetch_add(1, Ordering::AcqRel);
        self.semaphore.released.notify(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::thread;
    use std::time::Duration;

    fn semaphore(weight: usize) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(NonZeroUsize::new(weight).unwrap()))
    }

    #[test]
    fn permits_are_returned_on_drop() {
        let sem = semaphore(2);
        let a = async_io::block_on(sem.clone().acquire());
        let b = async_io::block_on(sem.clone().acquire());
        assert_eq!(sem.available(), 0);
        drop(a);
        assert_eq!(sem.available(), 1);
        drop(b);
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn exhausted_semaphore_blocks() {
        let sem = semaphore(1);
        let _held = sem.try_acquire().unwrap();
        assert!(sem.try_acquire().is_none());
        assert!(sem.clone().acquire().now_or_never().is_none());
    }

    #[test]
    fn dropped_acquire_keeps_the_permit() {
        let sem = semaphore(1);
        let held = sem.try_acquire().unwrap();
        // poll once while empty, then abandon the future
        assert!(sem.clone().acquire().now_or_never().is_none());
        drop(held);
        assert_eq!(sem.available(), 1);
        assert!(sem.clone().acquire().now_or_never().is_some());
    }

    #[test]
    fn waiter_wakes_on_release() {
        let sem = semaphore(1);
        let held = sem.try_acquire().unwrap();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            drop(held);
        });
        let _permit = async_io::block_on(sem.clone().acquire());
        releaser.join().unwrap();
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn huge_weight_costs_nothing_up_front() {
        let sem = semaphore(usize::MAX);
        assert_eq!(sem.weight(), usize::MAX);
        let permit = sem.try_acquire().unwrap();
        assert_eq!(sem.available(), usize::MAX - 1);
        drop(permit);
        assert_eq!(sem.available(), usize::MAX);
    }
}
