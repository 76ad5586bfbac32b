// tests/cluster/main.rs

// test modules
mod fixtures;

mod counter_tests;
mod limiter_tests;
mod registry_tests;

// Re-export common test utilities
pub use fixtures::test_clock::TestClock;
pub use fixtures::SEC;
