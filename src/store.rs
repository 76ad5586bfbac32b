// src/store.rs

//! The external store seam.
//!
//! The store is the cluster's only source of cross-process truth. Counters
//! push deltas to it and read accumulated totals back; everything else in
//! the crate is extrapolation. A production deployment backs this trait with
//! a remote key-value service; [`MemoryStore`] is the reference
//! implementation of the contract and doubles as the test store.

// dependencies
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::value::CounterValue;

/// Key under which a window's cumulative value accumulates: counter name,
/// window bounds (nanoseconds since the Unix epoch) and the label pairs the
/// owning registry sharded on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub name: String,
    pub begin_time: u64,
    pub end_time: u64,
    pub labels: Vec<(String, String)>,
}

impl StoreKey {
    pub fn new(name: &str, begin_time: u64, end_time: u64, labels: &[(String, String)]) -> Self {
        Self {
            name: name.to_owned(),
            begin_time,
            end_time,
            labels: labels.to_vec(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing data could not be reached. Loads must fail with this
    /// rather than silently returning zero, so callers can tell "no
    /// contributions yet" (a genuine zero) from "unreachable".
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Cross-instance accumulation contract.
///
/// `store` is idempotent-additive per key; `is_final` marks the terminal
/// push of a rolled-over window so the backend may seal that key.
/// Implementations apply their own timeouts: a call must surface failure as
/// an error rather than hang, since one heartbeat waits on it.
pub trait Store: Send + Sync + std::fmt::Debug {
    fn store(&self, key: &StoreKey, delta: CounterValue, is_final: bool) -> Result<(), StoreError>;

    fn load(&self, key: &StoreKey) -> Result<CounterValue, StoreError>;
}

/// In-process store backed by a concurrent map.
///
/// Useful on its own for single-process deployments, and as the shared fake
/// when simulating several instances in tests. `set_unavailable` makes every
/// call fail until cleared, for exercising the heartbeat's absorb-and-retry
/// path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: DashMap<StoreKey, CounterValue>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::Relaxed);
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(StoreError::Unavailable("memory store marked down".into()))
        } else {
            Ok(())
        }
    }
}

impl Store for MemoryStore {
    fn store(
        &self,
        key: &StoreKey,
        delta: CounterValue,
        _is_final: bool,
    ) -> Result<(), StoreError> {
        self.check_up()?;
        let mut entry = self.table.entry(key.clone()).or_default();
        *entry = entry.add(delta);
        Ok(())
    }

    fn load(&self, key: &StoreKey) -> Result<CounterValue, StoreError> {
        self.check_up()?;
        Ok(self.table.get(key).map(|v| *v).unwrap_or_default())
    }
}
