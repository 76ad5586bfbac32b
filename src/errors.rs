// src/errors.rs

//! Construction-time error taxonomy.
//!
//! Only configuration problems surface as errors; once a counter or limiter
//! is built, the hot path never returns one (see the crate docs). Store and
//! load failures are absorbed at the heartbeat boundary and retried on the
//! next tick.

// dependencies
use thiserror::Error;

use crate::clock::ClockError;

/// Error type for counter/limiter configuration issues.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("name must not be empty")]
    MissingName,
    #[error("window is degenerate: begin must precede end")]
    InvalidWindow,
    #[error("interval must be positive")]
    InvalidInterval,
    #[error("decline ratio must lie in (0, 1]")]
    InvalidDeclineRatio,
    #[error("initial traffic proportion must lie in (0, 1]")]
    InvalidProportion,
    #[error("boost factor must be at least 1")]
    InvalidBoostFactor,
    #[error("label names and values must have equal length")]
    LabelMismatch,
    #[error(transparent)]
    Clock(#[from] ClockError),
}
