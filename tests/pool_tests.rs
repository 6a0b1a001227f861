use reactor_http_server::pool::WorkerPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::time::Duration;

#[test]
fn test_pool_runs_every_job() {
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let pool = WorkerPool::new(4).unwrap();
        assert_eq!(pool.size(), 4);
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        // Dropping the pool drains the queue and joins the workers.
    }
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn test_zero_threads_is_rejected() {
    assert!(WorkerPool::new(0).is_err());
}

#[test]
fn test_bounded_pool_rejects_when_full() {
    let pool = WorkerPool::bounded(1, 1).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let gate = Arc::new(Barrier::new(2));

    let worker_gate = Arc::clone(&gate);
    pool.execute(move || {
        started_tx.send(()).unwrap();
        worker_gate.wait();
    })
    .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // The only worker is parked, so one job fits and the next is refused.
    pool.execute(|| {}).unwrap();
    assert_eq!(pool.queued(), 1);
    assert!(pool.execute(|| {}).is_err());

    gate.wait();
}

#[test]
fn test_panicking_job_keeps_worker_alive() {
    let pool = WorkerPool::new(1).unwrap();
    let (tx, rx) = mpsc::channel();

    pool.execute(|| panic!("task failure")).unwrap();
    pool.execute(move || tx.send(7).unwrap()).unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
}
