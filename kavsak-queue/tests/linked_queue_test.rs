use kavsak_queue::LinkedQueue;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

#[test]
fn test_linked_queue_simple() {
    let q = LinkedQueue::new();
    q.push(1);
    q.push(2);
    q.push(3);
    assert_eq!(q.pop(), Some(1));
    assert_eq!(q.pop(), Some(2));
    assert_eq!(q.pop(), Some(3));
    assert_eq!(q.pop(), None);
}

#[test]
fn test_linked_queue_cross_thread_fifo() {
    let q = Arc::new(LinkedQueue::new());
    {
        let q = q.clone();
        thread::spawn(move || {
            q.push(1);
            q.push(2);
            q.push(3);
        })
        .join()
        .unwrap();
    }

    let q2 = q.clone();
    let results = thread::spawn(move || {
        let mut out = vec![];
        for _ in 0..3 {
            loop {
                if let Some(v) = q2.pop() {
                    out.push(v);
                    break;
                }
                thread::yield_now();
            }
        }
        out
    })
    .join()
    .unwrap();

    assert_eq!(results, vec![1, 2, 3]);
    assert!(q.is_empty());
    assert_eq!(q.len(), 0);
}

#[test]
fn test_linked_queue_peek() {
    let q = LinkedQueue::new();
    assert_eq!(q.peek(), None);
    q.push(7);
    q.push(8);
    assert_eq!(q.peek(), Some(7));
    assert_eq!(q.peek(), Some(7));
    assert_eq!(q.pop(), Some(7));
    assert_eq!(q.peek(), Some(8));
}

#[test]
fn test_linked_queue_len_and_empty() {
    let q = LinkedQueue::new();
    assert!(q.is_empty());
    assert_eq!(q.len(), 0);
    for i in 0..10 {
        q.push(i);
    }
    assert!(!q.is_empty());
    assert_eq!(q.len(), 10);
    q.pop();
    q.pop();
    assert_eq!(q.len(), 8);
}

#[test]
fn test_linked_queue_contains_and_remove() {
    let q = LinkedQueue::new();
    q.push(1);
    q.push(2);
    q.push(3);
    q.push(2);
    assert!(q.contains(&2));
    assert!(!q.contains(&9));

    // Removes only the first match.
    assert!(q.remove(&2));
    assert!(q.contains(&2));
    assert_eq!(q.len(), 3);
    assert!(!q.remove(&9));

    // FIFO among the survivors.
    assert_eq!(q.pop(), Some(1));
    assert_eq!(q.pop(), Some(3));
    assert_eq!(q.pop(), Some(2));
    assert_eq!(q.pop(), None);
}

#[test]
fn test_linked_queue_remove_head_then_pop() {
    let q = LinkedQueue::new();
    q.push(1);
    q.push(2);
    assert!(q.remove(&1));
    assert_eq!(q.pop(), Some(2));
    assert_eq!(q.pop(), None);
    assert!(q.is_empty());
}

#[test]
fn test_linked_queue_retain() {
    let q = LinkedQueue::new();
    for i in 0..10 {
        q.push(i);
    }
    let removed = q.retain(|&v| v % 2 == 0);
    assert_eq!(removed, 5);
    let survivors: Vec<_> = q.iter().collect();
    assert_eq!(survivors, vec![0, 2, 4, 6, 8]);
}

#[test]
fn test_linked_queue_iter() {
    let q = LinkedQueue::new();
    for i in 0..5 {
        q.push(i);
    }
    let seen: Vec<_> = q.iter().collect();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    // Iteration does not consume.
    assert_eq!(q.len(), 5);
    assert_eq!(q.pop(), Some(0));
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_linked_queue_concurrent_pairs() {
    let q = Arc::new(LinkedQueue::new());
    let mut handles = vec![];

    // Producers
    for i in 0..4 {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for j in 0..1000 {
                q.push(i * 1000 + j);
            }
        }));
    }

    // Consumers
    for _ in 0..4 {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..1000 {
                while q.pop().is_none() {
                    thread::yield_now();
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert!(q.pop().is_none());
    assert!(q.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_linked_queue_no_loss_no_duplication() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 5000;

    let q = Arc::new(LinkedQueue::new());
    let mut producers = vec![];
    let mut consumers = vec![];

    for tid in 0..PRODUCERS {
        let q = q.clone();
        producers.push(thread::spawn(move || {
            for j in 0..PER_PRODUCER {
                q.push(tid * PER_PRODUCER + j);
            }
        }));
    }

    for _ in 0..CONSUMERS {
        let q = q.clone();
        consumers.push(thread::spawn(move || {
            let mut taken = Vec::new();
            while taken.len() < PRODUCERS * PER_PRODUCER / CONSUMERS {
                if let Some(v) = q.pop() {
                    taken.push(v);
                } else {
                    thread::yield_now();
                }
            }
            taken
        }));
    }

    for h in producers {
        h.join().unwrap();
    }

    let mut counts: HashMap<usize, usize> = HashMap::new();
    for h in consumers {
        for v in h.join().unwrap() {
            *counts.entry(v).or_insert(0) += 1;
        }
    }

    // Every pushed value came out exactly once.
    assert_eq!(counts.len(), PRODUCERS * PER_PRODUCER);
    assert!(counts.values().all(|&c| c == 1));
    assert!(q.pop().is_none());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_linked_queue_per_producer_order() {
    const PRODUCERS: usize = 3;
    const PER_PRODUCER: usize = 5000;

    let q = Arc::new(LinkedQueue::new());
    let mut handles = vec![];

    for tid in 0..PRODUCERS {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for j in 0..PER_PRODUCER {
                q.push((tid, j));
            }
        }));
    }

    let drained = {
        let q = q.clone();
        thread::spawn(move || {
            let mut seen = 0;
            let mut last: [Option<usize>; PRODUCERS] = [None; PRODUCERS];
            while seen < PRODUCERS * PER_PRODUCER {
                if let Some((tid, j)) = q.pop() {
                    // A single consumer must observe each producer's values
                    // in push order.
                    assert!(last[tid].map_or(true, |prev| prev < j));
                    last[tid] = Some(j);
                    seen += 1;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    for h in handles {
        h.join().unwrap();
    }
    drained.join().unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_linked_queue_concurrent_observers() {
    // Readers traverse while writers churn; no crash, no torn reads.
    let q = Arc::new(LinkedQueue::new());
    for i in 0..100 {
        q.push(i);
    }

    let mut handles = vec![];
    for tid in 0..2 {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for j in 0..2000 {
                q.push(1000 + tid * 2000 + j);
                q.pop();
            }
        }));
    }
    for _ in 0..2 {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                let _ = q.peek();
                let n = q.iter().count();
                assert!(n <= 100 + 4000);
                let _ = q.len();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(q.len(), 100);
}

#[test]
fn test_linked_queue_pop_unique_non_clone() {
    // Not Clone: drainable only through the exclusive move-out path.
    struct Payload(u32);

    let mut q = LinkedQueue::new();
    q.push(Payload(1));
    q.push(Payload(2));
    q.push(Payload(3));

    assert_eq!(q.pop_unique().map(|p| p.0), Some(1));
    assert_eq!(q.pop_unique().map(|p| p.0), Some(2));
    assert_eq!(q.pop_unique().map(|p| p.0), Some(3));
    assert!(q.pop_unique().is_none());
    assert!(q.is_empty());
}

#[test]
fn test_linked_queue_pop_unique_after_shared_ops() {
    let mut q = LinkedQueue::new();
    for i in 0..5 {
        q.push(i);
    }
    // Mix with shared-path operations first.
    assert_eq!(q.pop(), Some(0));
    assert!(q.remove(&2));

    assert_eq!(q.pop_unique(), Some(1));
    assert_eq!(q.pop_unique(), Some(3));
    assert_eq!(q.pop_unique(), Some(4));
    assert_eq!(q.pop_unique(), None);
}

#[test]
fn test_linked_queue_drop_with_items() {
    let q = LinkedQueue::new();
    for i in 0..100 {
        q.push(Arc::new(i));
    }
    q.pop();
    drop(q);
}
