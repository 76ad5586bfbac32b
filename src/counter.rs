// src/counter.rs

// cluster-limiter: cluster-wide counting with local accumulation and
// periodic store exchange.

// dependencies
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::clock::{Clock, SystemClock};
use crate::config::CounterConfig;
use crate::errors::LimiterError;
use crate::history::History;
use crate::store::{Store, StoreKey};
use crate::value::CounterValue;

/// Fixed weight blending a freshly observed traffic ratio into the running
/// proportion estimate. Deliberately independent of `decline_exp_ratio`.
const PROPORTION_BLEND: f64 = 0.5;

/// Load-history depth required before the self-calibrated proportion is
/// trusted over the configured seed.
const PROPORTION_MIN_SAMPLES: u64 = 4;

/// A value paired with the instant it was observed (nanoseconds since the
/// Unix epoch). The sentinel for an out-of-range history read is the zero
/// value at the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Snapshot {
    pub value: CounterValue,
    pub time: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct LoadSnapshot {
    /// Cluster-wide value the store reported.
    cluster: CounterValue,
    /// What this instance had pushed as of the load.
    local: CounterValue,
    time: u64,
}

#[derive(Debug)]
struct CounterState {
    begin_time: u64,
    end_time: u64,
    store_history: History<Snapshot>,
    load_history: History<LoadSnapshot>,
    last_store_value: CounterValue,
    last_store_time: u64,
    last_load_time: u64,
    load_init_value: CounterValue,
    has_init_value: bool,
    local_traffic_proportion: f64,
    recent_local: CounterValue,
    recent_cluster: CounterValue,
    expired: bool,
}

/// A counter that tracks local traffic and extrapolates the cluster-wide
/// total from periodic exchanges with a shared store.
///
/// `add` runs under a read lock with atomic arithmetic, so request paths
/// never block each other; store/load exchange and window rollover take the
/// write lock, and all store I/O happens with the lock released.
#[derive(Debug)]
pub struct ClusterCounter<C = SystemClock>
where
    C: Clock,
{
    name: String,
    labels: Vec<(String, String)>,
    reset_interval: u64,
    store_interval: u64,
    load_interval: u64,
    decline_exp_ratio: f64,
    discard_previous_data: bool,
    init_traffic_proportion: f64,
    init_time: u64,
    store: Option<Arc<dyn Store>>,
    clock: C,
    // hot-path accumulator; f64 bit pattern plus a plain count
    local_sum: AtomicU64,
    local_count: AtomicU64,
    state: RwLock<CounterState>,
}

fn align(t: u64, interval: u64) -> u64 {
    if interval == 0 { t } else { t - t % interval }
}

impl<C> ClusterCounter<C>
where
    C: Clock,
{
    /// Build and initialize a counter. When a store is configured, one load
    /// is attempted immediately to seed the first-load baseline; failure is
    /// absorbed and the seed happens on a later heartbeat instead.
    pub fn with_config(
        config: CounterConfig,
        store: Option<Arc<dyn Store>>,
        clock: C,
    ) -> Result<Self, LimiterError> {
        config.validate()?;
        let now = clock.now()?;
        let reset_interval = config.reset_interval.as_nanos() as u64;
        let (begin_time, end_time) = if reset_interval > 0 {
            let begin = align(now, reset_interval);
            (begin, begin + reset_interval)
        } else {
            (config.begin_time, config.end_time)
        };
        let counter = Self {
            name: config.name,
            labels: config.labels,
            reset_interval,
            store_interval: config.store_interval.as_nanos() as u64,
            load_interval: config.load_interval.as_nanos() as u64,
            decline_exp_ratio: config.decline_exp_ratio,
            discard_previous_data: config.discard_previous_data,
            init_traffic_proportion: config.init_local_traffic_proportion,
            init_time: now,
            store,
            clock,
            local_sum: AtomicU64::new(0f64.to_bits()),
            local_count: AtomicU64::new(0),
            state: RwLock::new(CounterState {
                begin_time,
                end_time,
                store_history: History::new(),
                load_history: History::new(),
                last_store_value: CounterValue::ZERO,
                last_store_time: 0,
                last_load_time: 0,
                load_init_value: CounterValue::ZERO,
                has_init_value: false,
                local_traffic_proportion: config.init_local_traffic_proportion,
                recent_local: CounterValue::ZERO,
                recent_cluster: CounterValue::ZERO,
                expired: false,
            }),
        };
        counter.seed_init_value(now);
        Ok(counter)
    }

    fn read(&self) -> RwLockReadGuard<'_, CounterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CounterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(&self, begin_time: u64, end_time: u64) -> StoreKey {
        StoreKey::new(&self.name, begin_time, end_time, &self.labels)
    }

    fn local_now(&self) -> CounterValue {
        CounterValue::new(
            f64::from_bits(self.local_sum.load(Ordering::Relaxed)),
            self.local_count.load(Ordering::Relaxed) as i64,
        )
    }

    fn seed_init_value(&self, now: u64) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let key = {
            let st = self.read();
            if now < st.begin_time || now >= st.end_time || st.has_init_value {
                return;
            }
            self.key(st.begin_time, st.end_time)
        };
        match store.load(&key) {
            Ok(cluster) => {
                let mut st = self.write();
                if !st.has_init_value {
                    st.load_init_value = cluster;
                    st.has_init_value = true;
                    let local = st.last_store_value;
                    st.load_history.push(LoadSnapshot {
                        cluster,
                        local,
                        time: now,
                    });
                }
            }
            Err(e) => log::debug!("counter {}: seed load skipped: {e}", self.name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current window bounds.
    pub fn window(&self) -> (u64, u64) {
        let st = self.read();
        (st.begin_time, st.end_time)
    }

    /// Instant of the last successful cross-instance load, 0 if none yet.
    pub fn last_load_time(&self) -> u64 {
        self.read().last_load_time
    }

    /// Current estimate of this instance's share of cluster traffic.
    pub fn local_traffic_proportion(&self) -> f64 {
        self.read().local_traffic_proportion
    }

    /// Record a locally observed value. Silently dropped outside the active
    /// window or when the clock fails.
    pub fn add(&self, v: f64) {
        let Ok(now) = self.clock.now() else {
            return;
        };
        let st = self.read();
        if st.expired || now < st.begin_time || now >= st.end_time {
            return;
        }
        let mut cur = self.local_sum.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(cur) + v).to_bits();
            match self
                .local_sum
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
        self.local_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Push the local delta since the last push to the store, if one is
    /// configured and the store interval has elapsed. Returns whether a
    /// store cycle ran to completion.
    pub fn store_data(&self) -> bool {
        let Ok(now) = self.clock.now() else {
            return false;
        };
        let Some(store) = self.store.clone() else {
            return false;
        };
        let (key, push) = {
            let mut st = self.write();
            if st.expired || now < st.begin_time || now >= st.end_time || !st.has_init_value {
                return false;
            }
            if st.last_store_time != 0 && now < st.last_store_time + self.store_interval {
                return false;
            }
            let local = self.local_now();
            st.store_history.push(Snapshot {
                value: local,
                time: now,
            });
            st.last_store_time = align(now, self.store_interval);
            let push = local.sub(st.last_store_value);
            if push.count <= 0 {
                return true;
            }
            (self.key(st.begin_time, st.end_time), push)
        };
        // store I/O with the lock released; adders are never blocked on it
        match store.store(&key, push, false) {
            Ok(()) => {
                let mut st = self.write();
                st.last_store_value = st.last_store_value.add(push);
                true
            }
            Err(e) => {
                log::warn!("counter {}: store failed, retrying next cycle: {e}", self.name);
                false
            }
        }
    }

    /// Read the cluster-wide accumulated value back from the store, if due.
    /// A successful load appends to the load history and recalibrates the
    /// local traffic proportion.
    pub fn load_data(&self) -> bool {
        let Ok(now) = self.clock.now() else {
            return false;
        };
        let Some(store) = self.store.clone() else {
            return false;
        };
        let key = {
            let mut st = self.write();
            if st.expired || now < st.begin_time || now >= st.end_time {
                return false;
            }
            if st.last_load_time != 0 && now < st.last_load_time + self.load_interval {
                return false;
            }
            st.last_load_time = align(now, self.load_interval);
            self.key(st.begin_time, st.end_time)
        };
        match store.load(&key) {
            Ok(cluster) => {
                let mut st = self.write();
                // stamp the reading at the middle of the store interval it
                // reflects, splitting the staleness error both ways
                let time = align(now, self.store_interval) + self.store_interval / 2;
                let local = st.last_store_value;
                st.load_history.push(LoadSnapshot {
                    cluster,
                    local,
                    time,
                });
                if !st.has_init_value {
                    st.load_init_value = cluster;
                    st.has_init_value = true;
                }
                self.update_local_traffic_proportion(&mut st);
                true
            }
            Err(e) => {
                log::warn!("counter {}: load failed, retrying next cycle: {e}", self.name);
                false
            }
        }
    }

    /// Re-estimate this instance's share of cluster traffic from the two
    /// most recent load snapshots, with exponential decline smoothing.
    fn update_local_traffic_proportion(&self, st: &mut CounterState) {
        let cur = st.load_history.recent(0).copied();
        let prev = st.load_history.recent(1).copied();
        if let (Some(cur), Some(prev)) = (cur, prev) {
            let local_delta = cur.local.sub(prev.local);
            let cluster_delta = cur.cluster.sub(prev.cluster);
            st.recent_local = st.recent_local.decline(local_delta, self.decline_exp_ratio);
            st.recent_cluster = st
                .recent_cluster
                .decline(cluster_delta, self.decline_exp_ratio);
        }
        if st.load_history.pos() >= PROPORTION_MIN_SAMPLES
            && st.recent_local.sum > 0.0
            && st.recent_cluster.sum > 0.0
        {
            let ratio = (st.recent_local.sum / st.recent_cluster.sum).min(1.0);
            st.local_traffic_proportion =
                st.local_traffic_proportion * PROPORTION_BLEND + ratio * (1.0 - PROPORTION_BLEND);
        } else if st.local_traffic_proportion == 0.0 {
            st.local_traffic_proportion = self.init_traffic_proportion;
        }
    }

    /// Cluster-wide value. `last == 0` is a live prediction extrapolated
    /// from local traffic since the most recent load; `last < 0` is a
    /// historical load snapshot, with the sentinel (zero value, Unix epoch)
    /// outside the retrievable range.
    pub fn cluster_value(&self, last: i64) -> Snapshot {
        let st = self.read();
        let discard = self.discard_previous_data && st.has_init_value;
        if last == 0 {
            let now = self.clock.now().unwrap_or(st.last_load_time);
            let latest = st.load_history.recent(0).copied().unwrap_or_default();
            let proportion = if st.local_traffic_proportion > 0.0 {
                st.local_traffic_proportion
            } else {
                self.init_traffic_proportion
            };
            let local_now = self.local_now();
            let mut predicted = CounterValue::new(
                latest.cluster.sum + (local_now.sum - latest.local.sum) / proportion,
                latest.cluster.count
                    + ((local_now.count - latest.local.count) as f64 / proportion) as i64,
            );
            if discard {
                predicted = predicted.sub(st.load_init_value);
            }
            return Snapshot {
                value: predicted,
                time: now,
            };
        }
        match st.load_history.get(last) {
            Some(entry) => {
                let mut value = entry.cluster;
                // the baseline only applies while the window it was captured
                // in is still the active one
                if discard && self.init_time >= st.begin_time && self.init_time < st.end_time {
                    value = value.sub(st.load_init_value);
                }
                Snapshot {
                    value,
                    time: entry.time,
                }
            }
            None => Snapshot::default(),
        }
    }

    /// Locally accumulated value. `last == 0` is the live accumulator;
    /// `last < 0` indexes the snapshots taken at store time.
    pub fn local_value(&self, last: i64) -> Snapshot {
        if last == 0 {
            let now = self.clock.now().unwrap_or(0);
            return Snapshot {
                value: self.local_now(),
                time: now,
            };
        }
        let st = self.read();
        st.store_history.get(last).copied().unwrap_or_default()
    }

    /// Value this instance has pushed to the store. `last == 0` is the
    /// high-water mark; `last < 0` indexes the local component of the load
    /// history (what had been pushed as of each load).
    pub fn local_store_value(&self, last: i64) -> Snapshot {
        let st = self.read();
        if last == 0 {
            return Snapshot {
                value: st.last_store_value,
                time: st.last_store_time,
            };
        }
        match st.load_history.get(last) {
            Some(entry) => Snapshot {
                value: entry.local,
                time: entry.time,
            },
            None => Snapshot::default(),
        }
    }

    /// One store-then-load exchange. Store runs first so the subsequent
    /// load observes this instance's freshest push.
    pub fn heartbeat(&self) {
        self.store_data();
        self.load_data();
    }

    /// Window lifecycle check. Non-repeating counters become terminally
    /// expired once the window passes. Repeating counters never report
    /// expired; crossing the boundary pushes the final delta and rolls
    /// local state into the next aligned window.
    pub fn expire(&self) -> bool {
        let Ok(now) = self.clock.now() else {
            return false;
        };
        if self.reset_interval == 0 {
            let mut st = self.write();
            if now > st.end_time {
                st.expired = true;
            }
            return st.expired;
        }
        let pending = {
            let mut st = self.write();
            if now < st.end_time {
                return false;
            }
            let key = self.key(st.begin_time, st.end_time);
            let push = self.local_now().sub(st.last_store_value);
            let begin = align(now, self.reset_interval);
            st.begin_time = begin;
            st.end_time = begin + self.reset_interval;
            st.store_history.reset();
            st.load_history.reset();
            st.last_store_value = CounterValue::ZERO;
            st.last_store_time = 0;
            st.last_load_time = 0;
            st.load_init_value = CounterValue::ZERO;
            st.has_init_value = false;
            st.recent_local = CounterValue::ZERO;
            st.recent_cluster = CounterValue::ZERO;
            self.local_sum.store(0f64.to_bits(), Ordering::Relaxed);
            self.local_count.store(0, Ordering::Relaxed);
            (key, push)
        };
        let (key, push) = pending;
        if push.count > 0 {
            if let Some(store) = &self.store {
                if let Err(e) = store.store(&key, push, true) {
                    log::warn!("counter {}: final store failed: {e}", self.name);
                }
            }
        }
        false
    }
}
