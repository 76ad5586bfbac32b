// src/limiter.rs

// cluster-limiter: reward-paced admission control over cluster counters.

// dependencies
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::counter::ClusterCounter;
use crate::errors::LimiterError;
use crate::report::Reporter;
use crate::store::Store;
use crate::value::CounterValue;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Boost/decay slope denominator: one second of lag moves the working rate
/// by `1 / (10 * burst_interval)` of the ideal rate.
const LAG_SLOPE_BURSTS: f64 = 10.0;

/// Decay when ahead of pace is this much steeper than boost when behind.
const DECAY_STEEPNESS: f64 = 4.0;

/// The working rate never decays below `ideal / PASS_RATE_FLOOR_DIV`, so a
/// trickle of admissions keeps feeding the rate estimators.
const PASS_RATE_FLOOR_DIV: f64 = 10_000.0;

/// A cross-instance load older than this many burst intervals means the
/// instance is effectively flying solo and rates are estimated from local
/// deltas only.
const LOAD_STALE_BURSTS: u64 = 10;

/// Minimum reservoir fill before the first percentile sort.
const SCORE_SORT_MIN_SAMPLES: usize = 100;

#[derive(Debug)]
struct LimiterState {
    begin_time: u64,
    end_time: u64,
    completion_time: u64,
    reward_target: f64,
    ideal_reward_rate: f64,
    ideal_pass_rate: f64,
    working_pass_rate: f64,
    score_cut_value: f64,
    score_cut_ready: bool,
    last_reward_rate_time: u64,
    last_pass_rate_time: u64,
    last_working_rate_time: u64,
    last_pass_local: CounterValue,
    last_reward_local: CounterValue,
    last_request_local: CounterValue,
    expired: bool,
}

#[derive(Debug)]
struct ScoreReservoir {
    samples: Vec<f64>,
    pos: u64,
    last_sort_time: u64,
}

/// Admission controller pacing a cumulative reward toward a target by a
/// deadline, using cluster-wide traffic estimates from three owned
/// [`ClusterCounter`]s (requests, passes, rewards).
///
/// `take`/`take_with_score`/`reward` are hot-path safe: they run under read
/// locks and short reservoir mutexes only. `heartbeat` recomputes the rates
/// and must be driven periodically, typically by a
/// [`LimiterRegistry`](crate::LimiterRegistry).
#[derive(Debug)]
pub struct ClusterLimiter<C = SystemClock>
where
    C: Clock,
{
    name: String,
    labels: Vec<(String, String)>,
    reset_interval: u64,
    reserve_interval: u64,
    burst_interval: u64,
    decline_exp_ratio: f64,
    max_boost_factor: f64,
    discard_previous_data: bool,
    score_samples_max: usize,
    score_sort_interval: u64,
    init_time: u64,
    clock: C,
    request: ClusterCounter<C>,
    pass: ClusterCounter<C>,
    reward: ClusterCounter<C>,
    reporter: Option<Arc<dyn Reporter>>,
    state: RwLock<LimiterState>,
    scores: Mutex<ScoreReservoir>,
    sorted_scores: RwLock<Vec<f64>>,
}

fn align(t: u64, interval: u64) -> u64 {
    if interval == 0 { t } else { t - t % interval }
}

impl<C> ClusterLimiter<C>
where
    C: Clock,
{
    pub fn with_config(
        config: LimiterConfig,
        store: Option<Arc<dyn Store>>,
        reporter: Option<Arc<dyn Reporter>>,
        clock: C,
    ) -> Result<Self, LimiterError> {
        config.validate()?;
        let now = clock.now()?;
        let reset_interval = config.reset_interval.as_nanos() as u64;
        let reserve_interval = config.reserve_interval.as_nanos() as u64;
        let (begin_time, end_time) = if reset_interval > 0 {
            let begin = align(now, reset_interval);
            (begin, begin + reset_interval)
        } else {
            (config.begin_time, config.end_time)
        };
        let completion_time = end_time.saturating_sub(reserve_interval);

        let request = ClusterCounter::with_config(
            config.counter_config("request"),
            store.clone(),
            clock.clone(),
        )?;
        let pass = ClusterCounter::with_config(
            config.counter_config("pass"),
            store.clone(),
            clock.clone(),
        )?;
        let reward =
            ClusterCounter::with_config(config.counter_config("reward"), store, clock.clone())?;

        Ok(Self {
            name: config.name,
            labels: config.labels,
            reset_interval,
            reserve_interval,
            burst_interval: config.burst_interval.as_nanos() as u64,
            decline_exp_ratio: config.decline_exp_ratio,
            max_boost_factor: config.max_boost_factor,
            discard_previous_data: config.discard_previous_data,
            score_samples_max: config.score_samples_max.max(1),
            score_sort_interval: config.score_samples_sort_interval.as_nanos() as u64,
            init_time: now,
            clock,
            request,
            pass,
            reward,
            reporter,
            state: RwLock::new(LimiterState {
                begin_time,
                end_time,
                completion_time,
                reward_target: config.reward_target,
                ideal_reward_rate: 1.0,
                ideal_pass_rate: 0.0,
                working_pass_rate: 0.0,
                score_cut_value: 0.0,
                score_cut_ready: false,
                last_reward_rate_time: 0,
                last_pass_rate_time: 0,
                last_working_rate_time: 0,
                last_pass_local: CounterValue::ZERO,
                last_reward_local: CounterValue::ZERO,
                last_request_local: CounterValue::ZERO,
                expired: false,
            }),
            scores: Mutex::new(ScoreReservoir {
                samples: Vec::with_capacity(config.score_samples_max.max(1)),
                pos: 0,
                last_sort_time: 0,
            }),
            sorted_scores: RwLock::new(Vec::new()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, LimiterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LimiterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reward_target(&self) -> f64 {
        self.read().reward_target
    }

    pub fn ideal_pass_rate(&self) -> f64 {
        self.read().ideal_pass_rate
    }

    pub fn working_pass_rate(&self) -> f64 {
        self.read().working_pass_rate
    }

    pub fn ideal_reward_rate(&self) -> f64 {
        self.read().ideal_reward_rate
    }

    /// Current percentile cutoff on admission scores, once enough samples
    /// have been collected and sorted.
    pub fn score_cut(&self) -> Option<f64> {
        let st = self.read();
        st.score_cut_ready.then_some(st.score_cut_value)
    }

    /// Reward the pacing curve calls for right now.
    pub fn pacing_target(&self) -> f64 {
        let Ok(now) = self.clock.now() else {
            return 0.0;
        };
        self.ideal_reward_at(&self.read(), now)
    }

    /// Reward the pacing curve calls for at `t` (nanoseconds since the Unix
    /// epoch).
    pub fn ideal_reward(&self, t: u64) -> f64 {
        self.ideal_reward_at(&self.read(), t)
    }

    /// Signed seconds of reward deficit at `t` given an achieved `reward`;
    /// positive means behind pace.
    pub fn lag_time(&self, reward: f64, t: u64) -> f64 {
        self.lag_time_at(&self.read(), reward, t)
    }

    /// The request counter, for inspection.
    pub fn request_counter(&self) -> &ClusterCounter<C> {
        &self.request
    }

    pub fn pass_counter(&self) -> &ClusterCounter<C> {
        &self.pass
    }

    pub fn reward_counter(&self) -> &ClusterCounter<C> {
        &self.reward
    }

    /// Admission decision by random sampling against the working pass rate,
    /// bounded by the reward budget. Fails closed when the window is over
    /// or no target is configured; denied traffic still counts as requests.
    pub fn take(&self, v: f64) -> bool {
        self.request.add(v);
        let Ok(now) = self.clock.now() else {
            return false;
        };
        let st = self.read();
        if !self.admissible(&st, now, v) {
            return false;
        }
        if rand::random::<f64>() > st.working_pass_rate {
            return false;
        }
        drop(st);
        self.pass.add(v);
        true
    }

    /// Admission decision by score percentile: once the sorted reservoir
    /// snapshot is ready, a request passes iff its score reaches the cut.
    /// Until then the random gate applies, but every score is still
    /// captured so the reservoir warms up.
    pub fn take_with_score(&self, v: f64, score: f64) -> bool {
        self.push_score(score);
        self.request.add(v);
        let Ok(now) = self.clock.now() else {
            return false;
        };
        let st = self.read();
        if !self.admissible(&st, now, v) {
            return false;
        }
        let admitted = if st.score_cut_ready {
            score >= st.score_cut_value
        } else {
            rand::random::<f64>() <= st.working_pass_rate
        };
        if !admitted {
            return false;
        }
        drop(st);
        self.pass.add(v);
        true
    }

    /// Record achieved reward. Callers invoke this after the work behind an
    /// admitted request actually succeeded; the limiter trusts them.
    pub fn reward(&self, v: f64) {
        self.reward.add(v);
    }

    /// Take and, if admitted, immediately reward the same amount.
    pub fn acquire(&self, v: f64) -> bool {
        let admitted = self.take(v);
        if admitted {
            self.reward.add(v);
        }
        admitted
    }

    pub fn acquire_with_score(&self, v: f64, score: f64) -> bool {
        let admitted = self.take_with_score(v, score);
        if admitted {
            self.reward.add(v);
        }
        admitted
    }

    /// Common deny-fast checks plus the reward-budget gate. The budget gate
    /// caps absolute overshoot even when the rate gate is momentarily too
    /// generous: an admitted request may push the predicted reward at most
    /// to `ideal + v`.
    fn admissible(&self, st: &LimiterState, now: u64, v: f64) -> bool {
        if st.expired || st.reward_target == 0.0 || now < st.begin_time || now >= st.end_time {
            return false;
        }
        let predicted = self.reward.cluster_value(0).value.sum;
        predicted + v <= self.ideal_reward_at(st, now)
    }

    fn push_score(&self, score: f64) {
        let mut res = self.scores.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = (res.pos % self.score_samples_max as u64) as usize;
        if res.samples.len() < self.score_samples_max {
            res.samples.push(score);
        } else {
            res.samples[idx] = score;
        }
        res.pos += 1;
    }

    /// Linear pacing curve: the reward the window should have accumulated
    /// by `t`. Zero before the window starts, the full target from the
    /// completion deadline onward. An instance that joined mid-window with
    /// `discard_previous_data` paces from its own start instead.
    fn ideal_reward_at(&self, st: &LimiterState, t: u64) -> f64 {
        let begin = if self.discard_previous_data
            && self.init_time > st.begin_time
            && self.init_time < st.end_time
        {
            self.init_time
        } else {
            st.begin_time
        };
        if st.completion_time <= begin || t <= begin {
            return 0.0;
        }
        if t >= st.completion_time {
            return st.reward_target;
        }
        let fraction = (t - begin) as f64 / (st.completion_time - begin) as f64;
        (st.reward_target * fraction).clamp(0.0, st.reward_target)
    }

    /// Signed seconds of reward deficit (positive = behind pace) relative
    /// to the pacing curve at `t`.
    fn lag_time_at(&self, st: &LimiterState, reward: f64, t: u64) -> f64 {
        if st.reward_target <= 0.0 || st.end_time <= st.begin_time {
            return 0.0;
        }
        let window_secs = (st.end_time - st.begin_time) as f64 / NANOS_PER_SEC;
        (self.ideal_reward_at(st, t) - reward) * window_secs / st.reward_target
    }

    /// EMA of the locally observed reward-per-pass ratio.
    fn update_ideal_reward_rate(&self, st: &mut LimiterState, now: u64) {
        if st.last_reward_rate_time != 0 && now < st.last_reward_rate_time + self.burst_interval {
            return;
        }
        st.last_reward_rate_time = now;
        let pass_local = self.pass.local_value(0).value;
        let reward_local = self.reward.local_value(0).value;
        let pass_delta = pass_local.sub(st.last_pass_local);
        let reward_delta = reward_local.sub(st.last_reward_local);
        st.last_pass_local = pass_local;
        st.last_reward_local = reward_local;
        if pass_delta.sum > 0.0 && reward_delta.sum >= 0.0 {
            let sample = reward_delta.sum / pass_delta.sum;
            st.ideal_reward_rate =
                st.ideal_reward_rate * self.decline_exp_ratio + sample * (1.0 - self.decline_exp_ratio);
        }
    }

    /// EMA of the pass rate that would track the pacing curve given current
    /// traffic. Skipped in the first and last burst interval of the window,
    /// where edge estimates are noise. Uses cluster-level history deltas
    /// when cross-instance loads are fresh, local deltas otherwise.
    fn update_ideal_pass_rate(&self, st: &mut LimiterState, now: u64) {
        if st.last_pass_rate_time != 0 && now < st.last_pass_rate_time + self.burst_interval {
            return;
        }
        if now < st.begin_time + self.burst_interval
            || now + self.burst_interval > st.end_time
        {
            return;
        }
        let prev_time = st.last_pass_rate_time;
        st.last_pass_rate_time = now;

        let request_local = self.request.local_value(0).value;
        let last_load = self.request.last_load_time();
        let solo =
            last_load == 0 || now > last_load + LOAD_STALE_BURSTS * self.burst_interval;

        let (ideal_delta, request_delta) = if solo {
            let delta = request_local.sub(st.last_request_local).sum;
            let from = if prev_time == 0 {
                now.saturating_sub(self.burst_interval)
            } else {
                prev_time
            };
            (
                self.ideal_reward_at(st, now) - self.ideal_reward_at(st, from),
                delta,
            )
        } else {
            let cur = self.request.cluster_value(-1);
            let prev = self.request.cluster_value(-2);
            if cur.time == 0 || prev.time == 0 || cur.time == prev.time {
                st.last_request_local = request_local;
                return;
            }
            (
                self.ideal_reward_at(st, cur.time) - self.ideal_reward_at(st, prev.time),
                cur.value.sum - prev.value.sum,
            )
        };
        st.last_request_local = request_local;

        if request_delta > 0.0 && st.ideal_reward_rate > 0.0 {
            let sample = ((ideal_delta / request_delta) / st.ideal_reward_rate).clamp(0.0, 1.0);
            st.ideal_pass_rate =
                st.ideal_pass_rate * self.decline_exp_ratio + sample * (1.0 - self.decline_exp_ratio);
        }
    }

    /// Adjust the live admission rate for observed lag or lead against the
    /// pacing curve, then refresh the percentile cut from the sorted score
    /// snapshot.
    fn update_working_pass_rate(&self, st: &mut LimiterState, now: u64) {
        if st.last_working_rate_time != 0
            && now < st.last_working_rate_time + self.burst_interval / 4
        {
            return;
        }
        st.last_working_rate_time = now;

        let in_edge_zone = now < st.begin_time + 2 * self.burst_interval
            || now + self.burst_interval > st.end_time;
        if in_edge_zone {
            st.working_pass_rate = st.ideal_pass_rate.clamp(0.0, 1.0);
        } else {
            let predicted = self.reward.cluster_value(0).value.sum;
            let lag = self.lag_time_at(st, predicted, now);
            let burst_secs = self.burst_interval as f64 / NANOS_PER_SEC;
            let working = if lag > 0.0 {
                let boosted = st.ideal_pass_rate * (1.0 + lag / (LAG_SLOPE_BURSTS * burst_secs));
                boosted.min(st.ideal_pass_rate * self.max_boost_factor)
            } else {
                let decayed = st.ideal_pass_rate
                    * (1.0 + DECAY_STEEPNESS * lag / (LAG_SLOPE_BURSTS * burst_secs));
                decayed.max(st.ideal_pass_rate / PASS_RATE_FLOOR_DIV)
            };
            st.working_pass_rate = working.clamp(0.0, 1.0);
        }

        let sorted = self
            .sorted_scores
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if !sorted.is_empty() && st.working_pass_rate > 0.0 && st.working_pass_rate < 1.0 {
            let idx = (((1.0 - st.working_pass_rate) * sorted.len() as f64) as usize)
                .min(sorted.len() - 1);
            st.score_cut_value = sorted[idx];
            st.score_cut_ready = true;
        } else {
            st.score_cut_ready = false;
        }
    }

    /// Snapshot the reservoir and rebuild the sorted copy used for
    /// percentile lookup. The O(n log n) sort runs with no lock held so it
    /// never stalls concurrent admission calls.
    fn sort_score_samples(&self, now: u64) {
        let mut snapshot = {
            let mut res = self.scores.lock().unwrap_or_else(PoisonError::into_inner);
            if res.last_sort_time != 0 && now < res.last_sort_time + self.score_sort_interval {
                return;
            }
            if res.samples.len() < SCORE_SORT_MIN_SAMPLES {
                return;
            }
            res.last_sort_time = now;
            res.samples.clone()
        };
        snapshot.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        *self
            .sorted_scores
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Drive the three counters' store/load exchange, then recompute the
    /// rates. Order matters: the working rate reads the ideal rates updated
    /// just before it.
    pub fn heartbeat(&self) {
        self.request.heartbeat();
        self.pass.heartbeat();
        self.reward.heartbeat();

        let Ok(now) = self.clock.now() else {
            return;
        };
        {
            let mut st = self.write();
            // outside the window nothing is recomputed; learned rates stay
            // readable until expiry or rollover
            if now < st.begin_time || now >= st.end_time {
                return;
            }
            if st.reward_target == 0.0 {
                st.ideal_pass_rate = 0.0;
                st.working_pass_rate = 0.0;
                st.ideal_reward_rate = 1.0;
                return;
            }
            self.update_ideal_reward_rate(&mut st, now);
            self.update_ideal_pass_rate(&mut st, now);
            self.update_working_pass_rate(&mut st, now);
        }
        self.sort_score_samples(now);
        self.report();
    }

    fn report(&self) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let st = self.read();
        let mut metrics = HashMap::new();
        metrics.insert("reward_target".to_owned(), st.reward_target);
        metrics.insert("ideal_reward_rate".to_owned(), st.ideal_reward_rate);
        metrics.insert("ideal_pass_rate".to_owned(), st.ideal_pass_rate);
        metrics.insert("working_pass_rate".to_owned(), st.working_pass_rate);
        drop(st);
        metrics.insert("request_local".to_owned(), self.request.local_value(0).value.sum);
        metrics.insert("pass_local".to_owned(), self.pass.local_value(0).value.sum);
        metrics.insert("reward_local".to_owned(), self.reward.local_value(0).value.sum);
        metrics.insert("reward_cluster".to_owned(), self.reward.cluster_value(0).value.sum);
        reporter.update(&self.name, &self.labels, &metrics);
    }

    /// Window lifecycle check, mirroring the counters'. Repeating windows
    /// roll forward and never report expired; non-repeating windows become
    /// terminal once past their end.
    pub fn expire(&self) -> bool {
        self.request.expire();
        self.pass.expire();
        self.reward.expire();

        let Ok(now) = self.clock.now() else {
            return false;
        };
        let mut st = self.write();
        if self.reset_interval == 0 {
            if now > st.end_time {
                st.expired = true;
            }
            return st.expired;
        }
        if now >= st.end_time {
            let begin = align(now, self.reset_interval);
            st.begin_time = begin;
            st.end_time = begin + self.reset_interval;
            st.completion_time = st.end_time.saturating_sub(self.reserve_interval);
            // the counters were just rolled over, so local baselines restart
            st.last_pass_local = CounterValue::ZERO;
            st.last_reward_local = CounterValue::ZERO;
            st.last_request_local = CounterValue::ZERO;
            st.last_reward_rate_time = 0;
            st.last_pass_rate_time = 0;
            st.last_working_rate_time = 0;
        }
        false
    }
}
