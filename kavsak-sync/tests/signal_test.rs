use kavsak_sync::{InterruptHandle, Notifier, Signal};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_signal_wakes_owner() {
    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let signal = Arc::new(Signal::new());
        tx.send(signal.clone()).unwrap();
        signal.wait();
        assert!(signal.is_notified());
    });

    let signal = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    Notifier::notify(signal.as_ref());
    waiter.join().unwrap();
}

#[test]
fn test_signal_wait_deadline_expires() {
    let signal = Signal::new();
    let start = Instant::now();
    assert!(!signal.wait_deadline(Instant::now() + Duration::from_millis(40)));
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn test_signal_notify_before_wait() {
    let signal = Signal::new();
    signal.notify();
    // Already notified: returns without parking.
    signal.wait();
    assert!(signal.wait_deadline(Instant::now()));
}

#[test]
fn test_interrupt_flag_consumed_once() {
    let handle = InterruptHandle::current();
    assert!(!handle.is_interrupted());

    handle.interrupt();
    assert!(handle.is_interrupted());
    assert!(handle.take_interrupted());
    // Consumed: a second take sees a clear flag.
    assert!(!handle.take_interrupted());
    assert!(!handle.is_interrupted());
}

#[test]
fn test_interrupt_handle_is_per_thread() {
    let mine = InterruptHandle::current();
    let theirs = thread::spawn(InterruptHandle::current).join().unwrap();
    assert!(!Arc::ptr_eq(&mine, &theirs));

    theirs.interrupt();
    assert!(!mine.is_interrupted());
    assert!(theirs.is_interrupted());
}

#[test]
fn test_interrupt_wakes_registered_waiter() {
    struct Flag(std::sync::atomic::AtomicBool);
    impl Notifier for Flag {
        fn notify(&self) {
            self.0.store(true, std::sync::atomic::Ordering::Release);
        }
    }

    let handle = InterruptHandle::current();
    let flag = Arc::new(Flag(std::sync::atomic::AtomicBool::new(false)));
    {
        let _registration = handle.register_waiter(flag.clone());
        handle.interrupt();
        assert!(flag.0.load(std::sync::atomic::Ordering::Acquire));
    }
    handle.take_interrupted();

    // Registration dropped: a later interrupt no longer notifies.
    flag.0.store(false, std::sync::atomic::Ordering::Release);
    handle.interrupt();
    assert!(!flag.0.load(std::sync::atomic::Ordering::Acquire));
    handle.take_interrupted();
}
