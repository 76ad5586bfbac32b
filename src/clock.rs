// src/clock.rs

// clock module definition and implementations

// dependencies
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock trait to abstract time retrieval.
/// Implementors must be thread-safe (Send + Sync) and cheap to clone, since a
/// registry hands one clock to every counter and limiter it creates.
/// The `now` method returns the current time in nanoseconds since the Unix
/// epoch; all window arithmetic in this crate is done on that value.
pub trait Clock: Send + Sync + Clone {
    fn now(&self) -> Result<u64, ClockError>;
}

/// Clock error type
#[derive(Debug)]
pub enum ClockError {
    SystemTimeError,
}

impl std::fmt::Display for ClockError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ClockError::SystemTimeError => write!(f, "system clock is before the Unix epoch"),
        }
    }
}

impl std::error::Error for ClockError {}

/// SystemClock implementation using the system time.
/// Returns the current time in nanoseconds since the Unix epoch.
/// This is the default clock used by counters, limiters and registries.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<u64, ClockError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .map_err(|_| ClockError::SystemTimeError)
    }
}
