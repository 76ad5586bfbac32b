// src/registry.rs

//! Label-sharded factories for counters and limiters.
//!
//! A registry maps a tuple of label values to a lazily created instance and
//! owns the one background heartbeat loop that keeps every live instance
//! exchanging with the store and recomputing its rates. Registries are
//! explicit objects with a start/stop lifecycle; there is no process-global
//! state.

// dependencies
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::config::{CounterConfig, LimiterConfig};
use crate::counter::ClusterCounter;
use crate::errors::LimiterError;
use crate::limiter::ClusterLimiter;
use crate::report::Reporter;
use crate::store::Store;

/// Default background tick driving heartbeat and expiry.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

fn composite_key(label_values: &[&str]) -> String {
    label_values.join("\u{1f}")
}

fn labels_for(names: &[String], values: &[&str]) -> Vec<(String, String)> {
    names
        .iter()
        .cloned()
        .zip(values.iter().map(|v| (*v).to_owned()))
        .collect()
}

/// Factory of [`ClusterCounter`]s sharded by label values.
///
/// Repeated calls with identical label values return the same instance.
#[derive(Debug)]
pub struct CounterRegistry<C = SystemClock>
where
    C: Clock,
{
    template: CounterConfig,
    label_names: Vec<String>,
    store: Option<Arc<dyn Store>>,
    clock: C,
    instances: Arc<DashMap<String, Arc<ClusterCounter<C>>>>,
    heartbeat_interval: Duration,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<C> CounterRegistry<C>
where
    C: Clock + 'static,
{
    pub fn new(
        template: CounterConfig,
        label_names: Vec<String>,
        store: Option<Arc<dyn Store>>,
        clock: C,
    ) -> Result<Self, LimiterError> {
        template.validate()?;
        Ok(Self {
            template,
            label_names,
            store,
            clock,
            instances: Arc::new(DashMap::new()),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Fetch or lazily create the counter for a label-value tuple.
    pub fn get_or_create(
        &self,
        label_values: &[&str],
    ) -> Result<Arc<ClusterCounter<C>>, LimiterError> {
        if label_values.len() != self.label_names.len() {
            return Err(LimiterError::LabelMismatch);
        }
        let key = composite_key(label_values);
        if let Some(existing) = self.instances.get(&key) {
            return Ok(existing.clone());
        }
        let config = self
            .template
            .clone()
            .labels(labels_for(&self.label_names, label_values));
        let counter = Arc::new(ClusterCounter::with_config(
            config,
            self.store.clone(),
            self.clock.clone(),
        )?);
        Ok(self
            .instances
            .entry(key)
            .or_insert(counter)
            .value()
            .clone())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// One heartbeat-and-expiry sweep over all live instances. The
    /// background loop calls this every tick; tests can call it directly.
    pub fn sweep(&self) {
        self.instances.retain(|_, counter| {
            counter.heartbeat();
            !counter.expire()
        });
    }

    /// Spawn the background heartbeat loop. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let instances = self.instances.clone();
        let running = self.running.clone();
        let interval = self.heartbeat_interval;
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                instances.retain(|_, counter: &mut Arc<ClusterCounter<C>>| {
                    counter.heartbeat();
                    !counter.expire()
                });
                std::thread::sleep(interval);
            }
        });
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Signal the background loop to stop and wait for it. Cooperative:
    /// takes effect within one tick. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl<C> Drop for CounterRegistry<C>
where
    C: Clock,
{
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Factory of [`ClusterLimiter`]s sharded by label values, with the same
/// memoization and lifecycle as [`CounterRegistry`].
#[derive(Debug)]
pub struct LimiterRegistry<C = SystemClock>
where
    C: Clock,
{
    template: LimiterConfig,
    label_names: Vec<String>,
    store: Option<Arc<dyn Store>>,
    reporter: Option<Arc<dyn Reporter>>,
    clock: C,
    instances: Arc<DashMap<String, Arc<ClusterLimiter<C>>>>,
    heartbeat_interval: Duration,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<C> LimiterRegistry<C>
where
    C: Clock + 'static,
{
    pub fn new(
        template: LimiterConfig,
        label_names: Vec<String>,
        store: Option<Arc<dyn Store>>,
        reporter: Option<Arc<dyn Reporter>>,
        clock: C,
    ) -> Result<Self, LimiterError> {
        template.validate()?;
        Ok(Self {
            template,
            label_names,
            store,
            reporter,
            clock,
            instances: Arc::new(DashMap::new()),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn get_or_create(
        &self,
        label_values: &[&str],
    ) -> Result<Arc<ClusterLimiter<C>>, LimiterError> {
        if label_values.len() != self.label_names.len() {
            return Err(LimiterError::LabelMismatch);
        }
        let key = composite_key(label_values);
        if let Some(existing) = self.instances.get(&key) {
            return Ok(existing.clone());
        }
        let config = self
            .template
            .clone()
            .labels(labels_for(&self.label_names, label_values));
        let limiter = Arc::new(ClusterLimiter::with_config(
            config,
            self.store.clone(),
            self.reporter.clone(),
            self.clock.clone(),
        )?);
        Ok(self
            .instances
            .entry(key)
            .or_insert(limiter)
            .value()
            .clone())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn sweep(&self) {
        self.instances.retain(|_, limiter| {
            limiter.heartbeat();
            !limiter.expire()
        });
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let instances = self.instances.clone();
        let running = self.running.clone();
        let interval = self.heartbeat_interval;
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                instances.retain(|_, limiter: &mut Arc<ClusterLimiter<C>>| {
                    limiter.heartbeat();
                    !limiter.expire()
                });
                std::thread::sleep(interval);
            }
        });
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl<C> Drop for LimiterRegistry<C>
where
    C: Clock,
{
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
