// src/lib.rs

//! # Cluster Limiter
//!
//! Cluster-aware quota tracking and reward-paced admission control.
//!
//! Each process instance counts its own traffic and periodically exchanges
//! aggregates with a shared store; from those exchanges it extrapolates a
//! live estimate of cluster-wide traffic without touching the store on every
//! request. On top of the estimate, [`ClusterLimiter`] paces admissions so a
//! cumulative reward metric lands on a target by a deadline.
//!
//! ## Quick Example
//!
//! ```rust
//! use cluster_limiter::{ClusterLimiter, LimiterConfig, SystemClock};
//! use std::time::Duration;
//!
//! let config = LimiterConfig::new("paced_campaign", 1000.0)
//!     .reset_interval(Duration::from_secs(60))
//!     .burst_interval(Duration::from_secs(1));
//! let limiter = ClusterLimiter::with_config(config, None, None, SystemClock).unwrap();
//!
//! // request path
//! if limiter.take(1.0) {
//!     // do the work, then report the achieved reward
//!     limiter.reward(1.0);
//! }
//!
//! // somewhere periodic (or use a LimiterRegistry)
//! limiter.heartbeat();
//! ```

// private modules
mod clock;
mod config;
mod counter;
mod errors;
mod history;
mod limiter;
mod registry;
mod report;
mod store;
mod value;

// public API exports
pub use clock::{Clock, ClockError, SystemClock};
pub use config::{CounterConfig, LimiterConfig};
pub use counter::{ClusterCounter, Snapshot};
pub use errors::LimiterError;
pub use history::HISTORY_CAPACITY;
pub use limiter::ClusterLimiter;
pub use registry::{CounterRegistry, LimiterRegistry, DEFAULT_HEARTBEAT_INTERVAL};
pub use report::{LogReporter, Reporter};
pub use store::{MemoryStore, Store, StoreError, StoreKey};
pub use value::CounterValue;
