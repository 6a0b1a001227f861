use reactor_http_server::timer::HeapTimer;
use std::time::{Duration, Instant};

#[test]
fn test_expire_sweeps_due_entries_in_order() {
    let base = Instant::now();
    let mut timer = HeapTimer::new();
    timer.add("five", base + Duration::from_secs(5));
    timer.add("one", base + Duration::from_secs(1));
    timer.add("three", base + Duration::from_secs(3));

    let expired = timer.expire(base + Duration::from_secs(4));
    assert_eq!(expired, vec!["one", "three"]);
    assert_eq!(timer.len(), 1);
    assert!(timer.contains(&"five"));
    assert_eq!(timer.expiry(&"five"), Some(base + Duration::from_secs(5)));
}

#[test]
fn test_refresh_replaces_instead_of_duplicating() {
    let base = Instant::now();
    let mut timer = HeapTimer::new();
    timer.add(1u32, base + Duration::from_secs(1));
    timer.add(2u32, base + Duration::from_secs(2));

    timer.add(1, base + Duration::from_secs(10));
    assert_eq!(timer.len(), 2);
    assert_eq!(timer.expire(base + Duration::from_secs(5)), vec![2]);

    assert!(timer.adjust(1, base + Duration::from_secs(3)));
    assert!(!timer.adjust(42, base));
    assert_eq!(timer.expire(base + Duration::from_secs(5)), vec![1]);
    assert!(timer.is_empty());
}

#[test]
fn test_cancel() {
    let base = Instant::now();
    let mut timer = HeapTimer::new();
    for id in 0..10u32 {
        timer.add(id, base + Duration::from_secs(u64::from(id)));
    }

    assert!(timer.cancel(&0));
    assert!(timer.cancel(&5));
    assert!(!timer.cancel(&5));

    let expired = timer.expire(base + Duration::from_secs(100));
    assert_eq!(expired, vec![1, 2, 3, 4, 6, 7, 8, 9]);
}

#[test]
fn test_next_expiry() {
    let base = Instant::now();
    let mut timer = HeapTimer::new();
    assert_eq!(timer.next_expiry(base), None);

    timer.add('a', base + Duration::from_millis(300));
    timer.add('b', base + Duration::from_millis(100));
    assert_eq!(timer.next_expiry(base), Some(Duration::from_millis(100)));
    assert_eq!(
        timer.next_expiry(base + Duration::from_secs(1)),
        Some(Duration::ZERO)
    );

    timer.clear();
    assert!(timer.is_empty());
    assert_eq!(timer.next_expiry(base), None);
}
