// tests/cluster/counter_tests.rs

use crate::{SEC, TestClock};
use cluster_limiter::{ClusterCounter, CounterConfig, MemoryStore, Snapshot};
use std::sync::Arc;
use std::time::Duration;

fn exchanging(name: &str, begin_secs: u64, end_secs: u64) -> CounterConfig {
    CounterConfig::new(name)
        .window(begin_secs * SEC, end_secs * SEC)
        .store_interval(Duration::from_secs(1))
        .load_interval(Duration::from_secs(1))
}

#[test]
fn store_history_keeps_only_the_ring_depth() {
    let clock = TestClock::at_secs(10_000);
    let store = Arc::new(MemoryStore::new());
    let counter = ClusterCounter::with_config(
        exchanging("ring", 10_000, 10_100),
        Some(store),
        clock.clone(),
    )
    .unwrap();

    for _ in 0..40 {
        counter.add(1.0);
        clock.advance_millis(1_000);
        counter.heartbeat();
    }

    // newest snapshot reflects all forty adds
    assert_eq!(counter.local_value(-1).value.sum, 40.0);
    // 29 back is the oldest retrievable entry
    assert_eq!(counter.local_value(-29).value.sum, 12.0);
    // the ring depth itself, anything older, and positive offsets are gone
    assert_eq!(counter.local_value(-30), Snapshot::default());
    assert_eq!(counter.local_value(-45), Snapshot::default());
    assert_eq!(counter.local_value(3), Snapshot::default());
}

#[test]
fn history_is_bounded_before_it_fills() {
    let clock = TestClock::at_secs(20_000);
    let store = Arc::new(MemoryStore::new());
    let counter = ClusterCounter::with_config(
        exchanging("warmup", 20_000, 20_100),
        Some(store),
        clock.clone(),
    )
    .unwrap();

    counter.add(1.0);
    clock.advance_millis(1_000);
    counter.heartbeat();

    // a single write is not yet reachable under the public bound
    assert_eq!(counter.local_value(-1), Snapshot::default());

    counter.add(1.0);
    clock.advance_millis(1_000);
    counter.heartbeat();
    assert_eq!(counter.local_value(-1).value.sum, 2.0);
    assert_eq!(counter.local_value(-2), Snapshot::default());
}

#[test]
fn clock_failure_drops_the_add_silently() {
    let clock = TestClock::at_secs(30_000);
    let counter = ClusterCounter::with_config(
        CounterConfig::new("flaky").window(30_000 * SEC, 30_100 * SEC),
        None,
        clock.clone(),
    )
    .unwrap();

    clock.fail_next_call();
    counter.add(1.0);
    assert_eq!(counter.local_value(0).value.count, 0);

    counter.add(1.0);
    assert_eq!(counter.local_value(0).value.count, 1);
}

#[test]
fn pushed_deltas_accumulate_across_instances() {
    let clock = TestClock::at_secs(40_000);
    let store = Arc::new(MemoryStore::new());
    let a = ClusterCounter::with_config(
        exchanging("shared", 40_000, 40_100),
        Some(store.clone()),
        clock.clone(),
    )
    .unwrap();
    let b = ClusterCounter::with_config(
        exchanging("shared", 40_000, 40_100),
        Some(store.clone()),
        clock.clone(),
    )
    .unwrap();

    for _ in 0..30 {
        a.add(1.0);
    }
    for _ in 0..10 {
        b.add(1.0);
    }
    clock.advance_millis(1_500);
    a.heartbeat();
    b.heartbeat();

    // b stored after a, so b's load already sees both contributions
    assert_eq!(b.cluster_value(0).value.sum, 40.0);
}

#[test]
fn local_store_value_tracks_the_high_water_mark() {
    let clock = TestClock::at_secs(50_000);
    let store = Arc::new(MemoryStore::new());
    let counter = ClusterCounter::with_config(
        exchanging("highwater", 50_000, 50_100),
        Some(store),
        clock.clone(),
    )
    .unwrap();

    counter.add(7.0);
    assert_eq!(counter.local_store_value(0).value.sum, 0.0);

    clock.advance_millis(1_000);
    counter.heartbeat();
    assert_eq!(counter.local_store_value(0).value.sum, 7.0);

    counter.add(2.0);
    // nothing new pushed until the next store interval
    assert_eq!(counter.local_store_value(0).value.sum, 7.0);
}
