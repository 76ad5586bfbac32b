// src/config.rs

//! Configuration types for counters and limiters.

// dependencies
use std::time::Duration;

use crate::errors::LimiterError;

/// Configuration for a [`ClusterCounter`](crate::ClusterCounter).
///
/// Windows come in two flavors. With a nonzero `reset_interval` the counter
/// runs repeating windows aligned to interval boundaries and rolls over
/// forever. With a zero `reset_interval` the window is the explicit
/// `[begin_time, end_time)` pair and the counter expires for good once it
/// passes.
#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub(crate) name: String,
    pub(crate) labels: Vec<(String, String)>,
    pub(crate) begin_time: u64,
    pub(crate) end_time: u64,
    pub(crate) reset_interval: Duration,
    pub(crate) store_interval: Duration,
    pub(crate) load_interval: Duration,
    pub(crate) decline_exp_ratio: f64,
    pub(crate) discard_previous_data: bool,
    pub(crate) init_local_traffic_proportion: f64,
}

impl CounterConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            labels: Vec::new(),
            begin_time: 0,
            end_time: 0,
            reset_interval: Duration::ZERO,
            store_interval: Duration::from_secs(2),
            load_interval: Duration::from_secs(2),
            decline_exp_ratio: 0.8,
            discard_previous_data: false,
            init_local_traffic_proportion: 1.0,
        }
    }

    pub fn labels(mut self, labels: Vec<(String, String)>) -> Self {
        self.labels = labels;
        self
    }

    /// Explicit window bounds, nanoseconds since the Unix epoch. Ignored
    /// when a `reset_interval` is set.
    pub fn window(mut self, begin_time: u64, end_time: u64) -> Self {
        self.begin_time = begin_time;
        self.end_time = end_time;
        self
    }

    pub fn reset_interval(mut self, interval: Duration) -> Self {
        self.reset_interval = interval;
        self
    }

    pub fn store_interval(mut self, interval: Duration) -> Self {
        self.store_interval = interval;
        self
    }

    pub fn load_interval(mut self, interval: Duration) -> Self {
        self.load_interval = interval;
        self
    }

    pub fn decline_exp_ratio(mut self, ratio: f64) -> Self {
        self.decline_exp_ratio = ratio;
        self
    }

    /// Subtract the cluster value seen at first load, so an instance that
    /// attaches mid-window reports only traffic it witnessed.
    pub fn discard_previous_data(mut self, discard: bool) -> Self {
        self.discard_previous_data = discard;
        self
    }

    /// Seed estimate of this instance's share of cluster traffic, used until
    /// enough load history exists to self-calibrate.
    pub fn init_local_traffic_proportion(mut self, proportion: f64) -> Self {
        self.init_local_traffic_proportion = proportion;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.name.is_empty() {
            return Err(LimiterError::MissingName);
        }
        if self.reset_interval.is_zero() && self.end_time < self.begin_time {
            return Err(LimiterError::InvalidWindow);
        }
        if self.store_interval.is_zero() || self.load_interval.is_zero() {
            return Err(LimiterError::InvalidInterval);
        }
        if !(self.decline_exp_ratio > 0.0 && self.decline_exp_ratio <= 1.0) {
            return Err(LimiterError::InvalidDeclineRatio);
        }
        if !(self.init_local_traffic_proportion > 0.0
            && self.init_local_traffic_proportion <= 1.0)
        {
            return Err(LimiterError::InvalidProportion);
        }
        Ok(())
    }
}

/// Configuration for a [`ClusterLimiter`](crate::ClusterLimiter).
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub(crate) name: String,
    pub(crate) labels: Vec<(String, String)>,
    pub(crate) begin_time: u64,
    pub(crate) end_time: u64,
    pub(crate) reset_interval: Duration,
    pub(crate) reward_target: f64,
    pub(crate) reserve_interval: Duration,
    pub(crate) burst_interval: Duration,
    pub(crate) store_interval: Duration,
    pub(crate) load_interval: Duration,
    pub(crate) decline_exp_ratio: f64,
    pub(crate) max_boost_factor: f64,
    pub(crate) discard_previous_data: bool,
    pub(crate) score_samples_max: usize,
    pub(crate) score_samples_sort_interval: Duration,
    pub(crate) init_local_traffic_proportion: f64,
}

impl LimiterConfig {
    pub fn new(name: &str, reward_target: f64) -> Self {
        Self {
            name: name.to_owned(),
            labels: Vec::new(),
            begin_time: 0,
            end_time: 0,
            reset_interval: Duration::ZERO,
            reward_target,
            reserve_interval: Duration::ZERO,
            burst_interval: Duration::from_secs(1),
            store_interval: Duration::from_secs(2),
            load_interval: Duration::from_secs(2),
            decline_exp_ratio: 0.5,
            max_boost_factor: 2.0,
            discard_previous_data: false,
            score_samples_max: 10_000,
            score_samples_sort_interval: Duration::from_secs(10),
            init_local_traffic_proportion: 1.0,
        }
    }

    pub fn labels(mut self, labels: Vec<(String, String)>) -> Self {
        self.labels = labels;
        self
    }

    pub fn window(mut self, begin_time: u64, end_time: u64) -> Self {
        self.begin_time = begin_time;
        self.end_time = end_time;
        self
    }

    pub fn reset_interval(mut self, interval: Duration) -> Self {
        self.reset_interval = interval;
        self
    }

    /// Tail buffer subtracted from the window end when computing the pacing
    /// deadline, leaving slack for the control loop to land on target.
    pub fn reserve_interval(mut self, interval: Duration) -> Self {
        self.reserve_interval = interval;
        self
    }

    /// Cadence and smoothing horizon for rate recomputation.
    pub fn burst_interval(mut self, interval: Duration) -> Self {
        self.burst_interval = interval;
        self
    }

    pub fn store_interval(mut self, interval: Duration) -> Self {
        self.store_interval = interval;
        self
    }

    pub fn load_interval(mut self, interval: Duration) -> Self {
        self.load_interval = interval;
        self
    }

    pub fn decline_exp_ratio(mut self, ratio: f64) -> Self {
        self.decline_exp_ratio = ratio;
        self
    }

    /// Ceiling multiplier on the ideal pass rate when running behind pace.
    pub fn max_boost_factor(mut self, factor: f64) -> Self {
        self.max_boost_factor = factor;
        self
    }

    pub fn discard_previous_data(mut self, discard: bool) -> Self {
        self.discard_previous_data = discard;
        self
    }

    pub fn score_samples_max(mut self, max: usize) -> Self {
        self.score_samples_max = max;
        self
    }

    pub fn score_samples_sort_interval(mut self, interval: Duration) -> Self {
        self.score_samples_sort_interval = interval;
        self
    }

    pub fn init_local_traffic_proportion(mut self, proportion: f64) -> Self {
        self.init_local_traffic_proportion = proportion;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.name.is_empty() {
            return Err(LimiterError::MissingName);
        }
        if self.reset_interval.is_zero() && self.end_time < self.begin_time {
            return Err(LimiterError::InvalidWindow);
        }
        if self.burst_interval.is_zero()
            || self.store_interval.is_zero()
            || self.load_interval.is_zero()
            || self.score_samples_sort_interval.is_zero()
        {
            return Err(LimiterError::InvalidInterval);
        }
        if !(self.decline_exp_ratio > 0.0 && self.decline_exp_ratio <= 1.0) {
            return Err(LimiterError::InvalidDeclineRatio);
        }
        if self.max_boost_factor < 1.0 {
            return Err(LimiterError::InvalidBoostFactor);
        }
        if !(self.init_local_traffic_proportion > 0.0
            && self.init_local_traffic_proportion <= 1.0)
        {
            return Err(LimiterError::InvalidProportion);
        }
        Ok(())
    }

    /// Counter configuration for one of the limiter's three internal
    /// counters, suffixed by role.
    pub(crate) fn counter_config(&self, role: &str) -> CounterConfig {
        CounterConfig {
            name: format!("{}.{role}", self.name),
            labels: self.labels.clone(),
            begin_time: self.begin_time,
            end_time: self.end_time,
            reset_interval: self.reset_interval,
            store_interval: self.store_interval,
            load_interval: self.load_interval,
            decline_exp_ratio: 0.8,
            discard_previous_data: self.discard_previous_data,
            init_local_traffic_proportion: self.init_local_traffic_proportion,
        }
    }
}
