use kavsak_sync::{Interrupted, InterruptHandle};
use kavsak_task::{CompletionService, DirectExecutor, TaskError, ThreadExecutor};
use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_completion_direct_executor_in_order() {
    let service = CompletionService::new(DirectExecutor);
    service.submit(|| Ok(1));
    service.submit(|| Ok(2));
    service.submit(|| Ok(3));

    // Inline execution completes in submission order.
    assert_eq!(service.take().unwrap().get().unwrap(), 1);
    assert_eq!(service.take().unwrap().get().unwrap(), 2);
    assert_eq!(service.take().unwrap().get().unwrap(), 3);
    assert!(service.poll().is_none());
}

#[test]
fn test_completion_poll_empty() {
    let service: CompletionService<u32, _> = CompletionService::new(DirectExecutor);
    assert!(service.poll().is_none());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_completion_order_not_submission_order() {
    let service = CompletionService::new(ThreadExecutor);
    let (tx, rx) = mpsc::channel();

    // The first submission finishes last.
    service.submit(move || {
        rx.recv().unwrap();
        Ok("slow")
    });
    service.submit(|| Ok("fast"));

    assert_eq!(service.take().unwrap().get().unwrap(), "fast");
    tx.send(()).unwrap();
    assert_eq!(service.take().unwrap().get().unwrap(), "slow");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_completion_take_blocks() {
    let service = CompletionService::new(ThreadExecutor);
    service.submit(|| {
        thread::sleep(Duration::from_millis(60));
        Ok(5)
    });

    let start = Instant::now();
    let task = service.take().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(task.get().unwrap(), 5);
}

#[test]
fn test_completion_poll_timeout() {
    let service: CompletionService<u32, _> = CompletionService::new(ThreadExecutor);
    let start = Instant::now();
    assert!(service
        .poll_timeout(Duration::from_millis(40))
        .unwrap()
        .is_none());
    assert!(start.elapsed() >= Duration::from_millis(40));

    service.submit(|| Ok(1));
    let task = service
        .poll_timeout(Duration::from_millis(500))
        .unwrap()
        .expect("task should complete within the timeout");
    assert_eq!(task.get().unwrap(), 1);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_completion_drains_all_submissions() {
    const JOBS: usize = 50;

    let service = CompletionService::new(ThreadExecutor);
    for i in 0..JOBS {
        service.submit(move || {
            // Scatter completion times.
            thread::sleep(Duration::from_millis((i % 7) as u64));
            Ok(i)
        });
    }

    let mut got = HashSet::new();
    for _ in 0..JOBS {
        let task = service.take().unwrap();
        assert!(got.insert(task.get().unwrap()));
    }
    assert_eq!(got.len(), JOBS);
    assert!(service.poll().is_none());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_completion_surfaces_failures_and_cancellations() {
    let service: CompletionService<u32, _> = CompletionService::new(DirectExecutor);

    let cancelled = service.submit(|| Ok(1));
    // DirectExecutor already ran it; cancel fails, but a pre-cancelled task
    // still flows through the queue below.
    assert!(!cancelled.cancel(false));

    service.submit(|| Err("bad input".into()));

    let first = service.take().unwrap();
    assert_eq!(first.get().unwrap(), 1);

    let second = service.take().unwrap();
    match second.get() {
        Err(TaskError::Failed(cause)) => assert_eq!(cause.to_string(), "bad input"),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_completion_take_interrupted() {
    let service: std::sync::Arc<CompletionService<u32, ThreadExecutor>> =
        std::sync::Arc::new(CompletionService::new(ThreadExecutor));

    let (tx, rx) = mpsc::channel();
    let taker = {
        let service = service.clone();
        thread::spawn(move || {
            tx.send(InterruptHandle::current()).unwrap();
            service.take()
        })
    };

    let handle = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));
    handle.interrupt();

    match taker.join().unwrap() {
        Err(e) => assert_eq!(e, Interrupted),
        Ok(_) => panic!("expected interruption, got a task"),
    }

    // The service keeps working after the abandoned wait.
    service.submit(|| Ok(3));
    assert_eq!(service.take().unwrap().get().unwrap(), 3);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_completion_multiple_consumers() {
    const JOBS: usize = 40;
    const CONSUMERS: usize = 4;

    let service = std::sync::Arc::new(CompletionService::new(ThreadExecutor));
    for i in 0..JOBS {
        service.submit(move || Ok(i));
    }

    let mut handles = vec![];
    for _ in 0..CONSUMERS {
        let service = service.clone();
        handles.push(thread::spawn(move || {
            let mut got = vec![];
            for _ in 0..JOBS / CONSUMERS {
                got.push(service.take().unwrap().get().unwrap());
            }
            got
        }));
    }

    let mut all: Vec<usize> = vec![];
    for h in handles {
        all.extend(h.join().unwrap());
    }
    all.sort_unstable();
    assert_eq!(all, (0..JOBS).collect::<Vec<_>>());
}
