// tests/cluster/fixtures/test_clock.rs

// dependencies
use cluster_limiter::{Clock, ClockError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::SEC;

// Test clock implementation
#[derive(Debug, Clone)]
pub struct TestClock {
    time: Arc<AtomicU64>, // Store as nanos
    should_fail: Arc<AtomicBool>,
}

impl TestClock {
    pub fn at_secs(secs: u64) -> Self {
        Self {
            time: Arc::new(AtomicU64::new(secs * SEC)),
            should_fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_secs(&self, secs: u64) {
        self.time.store(secs * SEC, Ordering::Relaxed);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.time.fetch_add(millis * 1_000_000, Ordering::Relaxed);
    }

    pub fn now_nanos(&self) -> u64 {
        self.time.load(Ordering::Relaxed)
    }

    // Make the next call to `now()` return an error
    pub fn fail_next_call(&self) {
        self.should_fail.store(true, Ordering::Relaxed);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Result<u64, ClockError> {
        if self.should_fail.swap(false, Ordering::Relaxed) {
            Err(ClockError::SystemTimeError)
        } else {
            Ok(self.time.load(Ordering::Relaxed))
        }
    }
}
