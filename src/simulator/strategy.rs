// src/simulator/strategy.rs
//! Stepping and pacing strategies.
//!
//! One executor serves every flavour of simulation. [`Stepping`] decides how
//! the clock moves between events (DEVS jumps, DESS fixed increments) and
//! [`Pacing`] decides whether the loop waits for the wall clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::SimulatorError;
use crate::time::SimTime;
use crate::time_source::TimeInterface;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stepping<T: SimTime> {
    /// Jump straight to the next event time.
    EventDriven,
    /// Advance in increments of `dt`, announcing every step even when no event
    /// is due. Events between two steps still run at their own time.
    FixedStep(T),
}

impl<T: SimTime> Stepping<T> {
    pub fn validate(&self) -> Result<(), SimulatorError> {
        match self {
            Stepping::EventDriven => Ok(()),
            Stepping::FixedStep(dt) if !dt.is_valid() || dt.is_negative() || *dt == T::zero() => Err(
                SimulatorError::InvalidConfiguration(format!("fixed step {dt} must be a positive time")),
            ),
            Stepping::FixedStep(_) => Ok(()),
        }
    }
}

impl<T: SimTime> Default for Stepping<T> {
    fn default() -> Self {
        Stepping::EventDriven
    }
}

/// Real-time pacing tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealTimeConfig {
    /// Multiplier on the wall-clock rate; 2.0 runs twice as fast as real time.
    pub speed_factor: f64,
    /// Wall seconds that one simulation time unit takes at speed 1.
    pub sim_unit_secs: f64,
    /// Longest stretch of back-to-back execution before yielding the thread.
    #[serde(rename = "catch_up_slice_ms", with = "millis")]
    pub catch_up_slice: Duration,
    /// Lag behind the wall clock beyond which a drift report is emitted.
    #[serde(rename = "drift_tolerance_ms", with = "millis")]
    pub drift_tolerance: Duration,
    /// When false, late events rebase the wall reference instead of
    /// running back to back to catch up.
    pub catch_up: bool,
    /// Sleep granularity while waiting for an event's wall deadline.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        Self {
            speed_factor: 1.0,
            sim_unit_secs: 1.0,
            catch_up_slice: Duration::from_millis(50),
            drift_tolerance: Duration::from_millis(100),
            catch_up: true,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl RealTimeConfig {
    pub fn validate(&self) -> Result<(), SimulatorError> {
        check_speed_factor(self.speed_factor)?;
        if !(self.sim_unit_secs.is_finite() && self.sim_unit_secs > 0.0) {
            return Err(SimulatorError::InvalidConfiguration(format!(
                "sim_unit_secs {} must be positive",
                self.sim_unit_secs
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(SimulatorError::InvalidConfiguration(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn check_speed_factor(speed_factor: f64) -> Result<(), SimulatorError> {
    if speed_factor.is_finite() && speed_factor > 0.0 {
        Ok(())
    } else {
        Err(SimulatorError::InvalidConfiguration(format!(
            "speed factor {speed_factor} must be positive"
        )))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Pacing {
    #[default]
    AsFastAsPossible,
    RealTime(RealTimeConfig),
}

impl Pacing {
    pub fn validate(&self) -> Result<(), SimulatorError> {
        match self {
            Pacing::AsFastAsPossible => Ok(()),
            Pacing::RealTime(config) => config.validate(),
        }
    }
}

/// Speed factor handed from control threads to the executor.
#[derive(Debug, Default)]
pub(crate) struct SpeedControl {
    bits: AtomicU64,
    changed: AtomicBool,
}

impl SpeedControl {
    pub(crate) fn request(&self, speed_factor: f64) {
        self.bits.store(speed_factor.to_bits(), Ordering::SeqCst);
        self.changed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take(&self) -> Option<f64> {
        self.changed
            .swap(false, Ordering::SeqCst)
            .then(|| f64::from_bits(self.bits.load(Ordering::SeqCst)))
    }
}

/// Outcome of one pacing check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Pace {
    /// The target time is due now.
    Due,
    /// Due, but the wall clock is ahead by more than the drift tolerance.
    Late { lag_secs: f64 },
    /// Slept one poll interval without reaching the deadline.
    Waited,
}

/// Maps simulation time onto the wall clock.
///
/// The deadline of simulation time `t` is
/// `wall_ref + (t - sim_ref) * sim_unit_secs / speed_factor`. The reference
/// pair is taken lazily at the first check after a reset, so pauses and speed
/// changes never make the loop race to catch up with wall time it did not run.
pub(crate) struct Pacer {
    config: Option<RealTimeConfig>,
    time_source: Arc<dyn TimeInterface>,
    speed_factor: f64,
    reference: Option<(Instant, f64)>,
    burst_started: Option<Instant>,
    drifting: bool,
}

impl Pacer {
    pub(crate) fn new(pacing: Pacing, time_source: Arc<dyn TimeInterface>) -> Self {
        let config = match pacing {
            Pacing::AsFastAsPossible => None,
            Pacing::RealTime(config) => Some(config),
        };
        Self {
            speed_factor: config.map_or(1.0, |c| c.speed_factor),
            config,
            time_source,
            reference: None,
            burst_started: None,
            drifting: false,
        }
    }

    pub(crate) fn is_real_time(&self) -> bool {
        self.config.is_some()
    }

    pub(crate) fn reset(&mut self) {
        self.reference = None;
        self.burst_started = None;
        self.drifting = false;
    }

    pub(crate) fn set_speed_factor(&mut self, speed_factor: f64) {
        tracing::debug!("Speed factor {} -> {}", self.speed_factor, speed_factor);
        self.speed_factor = speed_factor;
        self.reference = None;
    }

    /// Checks whether `target` is due, with `now` the current simulation time.
    pub(crate) fn pace(&mut self, now: f64, target: f64) -> Pace {
        let Some(config) = self.config else {
            return Pace::Due;
        };
        let wall_now = self.time_source.now_monotonic();
        let (wall_ref, sim_ref) = *self.reference.get_or_insert((wall_now, now));
        let offset_secs = (target - sim_ref).max(0.0) * config.sim_unit_secs / self.speed_factor;
        let deadline = Duration::try_from_secs_f64(offset_secs)
            .ok()
            .and_then(|offset| wall_ref.checked_add(offset));

        let Some(deadline) = deadline.filter(|d| *d <= wall_now) else {
            let remaining = deadline.map_or(config.poll_interval, |d| d - wall_now);
            self.burst_started = None;
            self.time_source.sleep(remaining.min(config.poll_interval));
            return Pace::Waited;
        };

        let burst = *self.burst_started.get_or_insert(wall_now);
        if wall_now - burst >= config.catch_up_slice {
            self.time_source.yield_now();
            self.burst_started = Some(self.time_source.now_monotonic());
        }

        let lag = wall_now - deadline;
        if lag <= config.drift_tolerance {
            self.drifting = false;
            return Pace::Due;
        }
        if !config.catch_up {
            self.reference = Some((wall_now, target));
        }
        if self.drifting {
            Pace::Due
        } else {
            self.drifting = true;
            Pace::Late {
                lag_secs: lag.as_secs_f64(),
            }
        }
    }
}
