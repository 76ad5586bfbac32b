// tests/cluster/registry_tests.rs

use crate::{SEC, TestClock};
use cluster_limiter::{
    CounterConfig, CounterRegistry, LimiterConfig, LimiterError, LimiterRegistry,
};
use std::sync::Arc;
use std::time::Duration;

fn counter_template(begin_secs: u64, end_secs: u64) -> CounterConfig {
    CounterConfig::new("jobs").window(begin_secs * SEC, end_secs * SEC)
}

#[test]
fn identical_labels_share_one_instance() {
    let clock = TestClock::at_secs(1000);
    let registry = CounterRegistry::new(
        counter_template(1000, 1100),
        vec!["tenant".to_owned(), "region".to_owned()],
        None,
        clock,
    )
    .unwrap();

    let a = registry.get_or_create(&["acme", "eu"]).unwrap();
    let b = registry.get_or_create(&["acme", "eu"]).unwrap();
    let c = registry.get_or_create(&["acme", "us"]).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(registry.len(), 2);

    a.add(3.0);
    assert_eq!(b.local_value(0).value.sum, 3.0);
}

#[test]
fn wrong_label_arity_is_rejected() {
    let clock = TestClock::at_secs(1000);
    let registry = CounterRegistry::new(
        counter_template(1000, 1100),
        vec!["tenant".to_owned()],
        None,
        clock,
    )
    .unwrap();

    assert!(matches!(
        registry.get_or_create(&["acme", "eu"]),
        Err(LimiterError::LabelMismatch)
    ));
    assert!(matches!(
        registry.get_or_create(&[]),
        Err(LimiterError::LabelMismatch)
    ));
    assert!(registry.is_empty());
}

#[test]
fn sweep_evicts_expired_instances() {
    let clock = TestClock::at_secs(1000);
    let registry = CounterRegistry::new(
        counter_template(1000, 1100),
        vec!["tenant".to_owned()],
        None,
        clock.clone(),
    )
    .unwrap();

    registry.get_or_create(&["acme"]).unwrap();
    registry.get_or_create(&["globex"]).unwrap();
    registry.sweep();
    assert_eq!(registry.len(), 2);

    clock.set_secs(1101);
    registry.sweep();
    assert!(registry.is_empty());
}

#[test]
fn repeating_instances_survive_sweeps() {
    let clock = TestClock::at_secs(1000);
    let template = CounterConfig::new("jobs").reset_interval(Duration::from_secs(60));
    let registry =
        CounterRegistry::new(template, vec!["tenant".to_owned()], None, clock.clone())
            .unwrap();

    registry.get_or_create(&["acme"]).unwrap();
    clock.set_secs(5000);
    registry.sweep();
    assert_eq!(registry.len(), 1);
}

#[test]
fn limiter_registry_memoizes_and_validates() {
    let clock = TestClock::at_secs(1000);
    let template = LimiterConfig::new("campaign", 500.0).window(1000 * SEC, 1100 * SEC);
    let registry =
        LimiterRegistry::new(template, vec!["tenant".to_owned()], None, None, clock)
            .unwrap();

    let a = registry.get_or_create(&["acme"]).unwrap();
    let b = registry.get_or_create(&["acme"]).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.reward_target(), 500.0);

    assert!(matches!(
        registry.get_or_create(&["acme", "extra"]),
        Err(LimiterError::LabelMismatch)
    ));
}

#[test]
fn invalid_template_is_rejected_up_front() {
    let clock = TestClock::at_secs(1000);
    let result = CounterRegistry::new(CounterConfig::new(""), Vec::new(), None, clock);
    assert!(matches!(result, Err(LimiterError::MissingName)));
}

#[test]
fn background_loop_starts_and_stops() {
    let clock = TestClock::at_secs(1000);
    let registry = CounterRegistry::new(
        counter_template(1000, 1100),
        vec!["tenant".to_owned()],
        None,
        clock.clone(),
    )
    .unwrap()
    .heartbeat_interval(Duration::from_millis(1));

    registry.get_or_create(&["acme"]).unwrap();
    registry.start();
    registry.start(); // second call is a no-op

    // the loop evicts the instance once its window has passed
    clock.set_secs(1101);
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !registry.is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(registry.is_empty());

    registry.stop();
    registry.stop();
}
