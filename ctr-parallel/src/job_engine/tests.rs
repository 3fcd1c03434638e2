use crate::context::{CancelCause, Context};
use crate::controller::Controller;
use crate::error::JobError;
use crate::job_engine::dispatcher::Dispatcher;
use crate::job_engine::job::JobState;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn dispatcher_with_limit(limit: usize) -> Dispatcher {
    let controller = Arc::new(Controller::with_limit(limit).unwrap());
    Dispatcher::new(controller).unwrap()
}

/// Simple shared integer counter
fn shared_counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

//
// 1. Never more than `limit` operations at once
//
#[test]
fn test_concurrency_bound() {
    let dispatcher = dispatcher_with_limit(3);
    let live = shared_counter();
    let peak = shared_counter();

    let (op_live, op_peak) = (live.clone(), peak.clone());
    let outcomes = dispatcher
        .dispatch_blocking(&Context::background(), 0..20u32, move |_| {
            let now = op_live.fetch_add(1, Ordering::SeqCst) + 1;
            op_peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            op_live.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert_eq!(outcomes.len(), 20);
    assert!(outcomes.values().all(|o| o.is_ok()));
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 1);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

//
// 2. Failures stay with their item
//
#[test]
fn test_error_isolation() {
    let dispatcher = dispatcher_with_limit(4);
    let outcomes = dispatcher
        .dispatch_blocking(&Context::background(), 0..10u32, |i| {
            if i % 2 == 0 {
                anyhow::bail!("injected failure {i}");
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(outcomes.len(), 10);
    for (i, outcome) in &outcomes {
        if i % 2 == 0 {
            let err = outcome.as_ref().unwrap_err();
            assert_eq!(err.to_string(), format!("injected failure {i}"));
        } else {
            assert!(outcome.is_ok());
        }
    }
}

//
// 3. Empty batch never calls the operation
//
#[test]
fn test_empty_batch() {
    let dispatcher = dispatcher_with_limit(2);
    let calls = shared_counter();
    let op_calls = calls.clone();
    let outcomes = dispatcher
        .dispatch_blocking(&Context::background(), Vec::<String>::new(), move |_| {
            op_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

//
// 4. Cancellation aborts waiting items but not the running one
//
#[test]
fn test_cancellation_while_waiting_for_permits() {
    let dispatcher = dispatcher_with_limit(1);
    let (ctx, cancel) = Context::background().with_cancel();
    let completed = shared_counter();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
    });

    let op_completed = completed.clone();
    let started = Instant::now();
    let result = dispatcher.dispatch_blocking(&ctx, ["a", "b", "c"], move |_| {
        thread::sleep(Duration::from_secs(1));
        op_completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    canceller.join().unwrap();

    assert!(matches!(result, Err(JobError::Canceled(CancelCause::Canceled))));
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(completed.load(Ordering::SeqCst) <= 1);

    // the item that already started finishes and hands its permit back
    dispatcher.wait_until_finished();
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.controller().available_permits(), 1);
}

//
// 5. Deadline on the batch context
//
#[test]
fn test_deadline_while_waiting() {
    let dispatcher = dispatcher_with_limit(1);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = dispatcher.enqueue_fn(&Context::background(), "blocker", move || {
        let _ = release_rx.recv();
        Ok(())
    });
    blocker.wait_for_state(JobState::Running);

    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let waiting = dispatcher.enqueue_fn(&ctx, "waiting", || Ok(()));
    let err = waiting.wait().unwrap_err();
    assert!(matches!(
        err,
        JobError::Canceled(CancelCause::DeadlineExceeded)
    ));

    release_tx.send(()).unwrap();
    assert!(blocker.wait().is_ok());
}

//
// 6. Job states as seen through the handle
//
#[test]
fn test_job_state_transitions() {
    let dispatcher = dispatcher_with_limit(1);
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let first = dispatcher.enqueue_fn(&Context::background(), "first", move || {
        let _ = release_rx.recv();
        Ok(())
    });
    assert_eq!(first.wait_for_state(JobState::Running), JobState::Running);

    let second = dispatcher.enqueue_fn(&Context::background(), "second", || Ok(()));
    assert_eq!(
        second.wait_for_state(JobState::AcquiringPermit),
        JobState::AcquiringPermit
    );
    assert_eq!(second.desc(), "second");

    release_tx.send(()).unwrap();
    assert!(first.wait().is_ok());
    assert_eq!(
        second.wait_for_state(JobState::Completed),
        JobState::Completed
    );
    assert!(second.wait().is_ok());
}

#[test]
fn test_canceled_job_state() {
    let dispatcher = dispatcher_with_limit(1);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = dispatcher.enqueue_fn(&Context::background(), "blocker", move || {
        let _ = release_rx.recv();
        Ok(())
    });
    blocker.wait_for_state(JobState::Running);

    let (ctx, cancel) = Context::background().with_cancel();
    let ran = shared_counter();
    let job_ran = ran.clone();
    let waiting = dispatcher.enqueue_fn(&ctx, "waiting", move || {
        job_ran.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    waiting.wait_for_state(JobState::AcquiringPermit);
    cancel.cancel();

    assert_eq!(
        waiting.wait_for_state(JobState::Completed),
        JobState::Canceled
    );
    assert!(waiting.wait().unwrap_err().is_cancellation());

    release_tx.send(()).unwrap();
    assert!(blocker.wait().is_ok());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

//
// 7. Failure propagation: a panicking job does not take the dispatcher down
//
#[test]
fn test_panicking_job_is_reported_per_item() {
    let dispatcher = dispatcher_with_limit(2);
    let outcomes = dispatcher
        .dispatch_blocking(&Context::background(), 0..4u32, |i| {
            if i == 2 {
                panic!("intentional test panic");
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(outcomes.len(), 4);
    let err = outcomes[&2].as_ref().unwrap_err();
    assert!(err.to_string().contains("intentional test panic"));
    assert!(outcomes[&0].is_ok() && outcomes[&1].is_ok() && outcomes[&3].is_ok());
    assert_eq!(dispatcher.controller().available_permits(), 2);
}

#[test]
fn test_duplicate_items_run_once() {
    let dispatcher = dispatcher_with_limit(2);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let op_calls = calls.clone();
    let outcomes = dispatcher
        .dispatch_blocking(&Context::background(), ["x", "y", "x"], move |id| {
            op_calls.lock().unwrap().push(id);
            Ok(())
        })
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    let mut calls = calls.lock().unwrap().clone();
    calls.sort();
    assert_eq!(calls, vec!["x", "y"]);
}

//
// 8. Reconfiguring the controller mid-batch
//
#[test]
fn test_set_limit_during_batch() {
    let controller = Arc::new(Controller::with_limit(1).unwrap());
    let dispatcher = Dispatcher::new(controller.clone()).unwrap();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = dispatcher.enqueue_fn(&Context::background(), "blocker", move || {
        let _ = release_rx.recv();
        Ok(())
    });
    blocker.wait_for_state(JobState::Running);

    // new jobs draw from the new semaphore while the old permit is still out
    controller.set_limit(2).unwrap();
    let outcomes = dispatcher
        .dispatch_blocking(&Context::background(), 0..6u32, |_| Ok(()))
        .unwrap();
    assert_eq!(outcomes.len(), 6);

    release_tx.send(()).unwrap();
    assert!(blocker.wait().is_ok());
    assert_eq!(controller.available_permits(), 2);
}

//
// 9. Shutdown
//
#[test]
fn test_no_jobs_after_close() {
    let dispatcher = dispatcher_with_limit(2);
    dispatcher.close();

    let executed = shared_counter();
    let e = executed.clone();
    let handle = dispatcher.enqueue_fn(&Context::background(), "late", move || {
        e.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(matches!(handle.wait(), Err(JobError::DispatcherClosed)));
    assert_eq!(executed.load(Ordering::SeqCst), 0);
    dispatcher.wait_until_finished();
}

#[test]
fn test_wait_until_finished_waits_for_abandoned_jobs() {
    let dispatcher = dispatcher_with_limit(2);
    let ctx = Context::background().with_timeout(Duration::from_millis(100));
    let finished = shared_counter();

    let op_finished = finished.clone();
    let result = dispatcher.dispatch_blocking(&ctx, 0..3u32, move |_| {
        thread::sleep(Duration::from_millis(400));
        op_finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert!(matches!(
        result,
        Err(JobError::Canceled(CancelCause::DeadlineExceeded))
    ));
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    dispatcher.wait_until_finished();
    assert_eq!(finished.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.controller().available_permits(), 2);
}

#[test]
fn test_many_small_jobs() {
    let dispatcher = dispatcher_with_limit(4);
    let count = shared_counter();

    let handles: Vec<_> = (0..200)
        .map(|i| {
            let c = count.clone();
            dispatcher.enqueue_fn(&Context::background(), format!("job-{i}"), move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    dispatcher.wait_until_finished();
    for handle in handles {
        assert!(handle.wait().is_ok());
    }
    assert_eq!(count.load(Ordering::SeqCst), 200);
}
