// src/report.rs

//! Best-effort metrics export.

// dependencies
use std::collections::HashMap;

/// Push-style sink for named numeric gauges. Calls never fail and never
/// block for long; an implementation that drops updates under pressure is
/// within contract.
pub trait Reporter: Send + Sync + std::fmt::Debug {
    fn update(&self, name: &str, labels: &[(String, String)], metrics: &HashMap<String, f64>);
}

/// Reporter that forwards every update to the `log` facade at debug level.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn update(&self, name: &str, labels: &[(String, String)], metrics: &HashMap<String, f64>) {
        log::debug!("metrics {name} {labels:?}: {metrics:?}");
    }
}
