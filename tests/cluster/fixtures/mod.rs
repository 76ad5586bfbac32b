// tests/cluster/fixtures/mod.rs

pub mod test_clock;

/// Nanoseconds per second, for window math in tests.
pub const SEC: u64 = 1_000_000_000;
