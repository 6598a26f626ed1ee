// src/calendar.rs
//! Calendar time on top of the numeric simulation clock.
//!
//! The kernel only knows `f64` model time. A [`CalendarClock`] fixes an epoch
//! and a unit so that model code can think in dates while the simulator keeps
//! scheduling numbers.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SimulatorError;
use crate::event::{Action, EventHandle, Priority};
use crate::simulator::SimContext;

/// Length of one simulation time unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarUnit {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl CalendarUnit {
    pub fn millis(self) -> f64 {
        match self {
            CalendarUnit::Milliseconds => 1.0,
            CalendarUnit::Seconds => 1_000.0,
            CalendarUnit::Minutes => 60_000.0,
            CalendarUnit::Hours => 3_600_000.0,
            CalendarUnit::Days => 86_400_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarClock {
    epoch: DateTime<Utc>,
    unit: CalendarUnit,
}

impl CalendarClock {
    pub fn new(epoch: DateTime<Utc>, unit: CalendarUnit) -> Self {
        Self { epoch, unit }
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    pub fn unit(&self) -> CalendarUnit {
        self.unit
    }

    /// Model time of `at`; instants before the epoch map to negative times.
    pub fn to_sim_time(&self, at: DateTime<Utc>) -> f64 {
        (at - self.epoch).num_milliseconds() as f64 / self.unit.millis()
    }

    /// Calendar instant of model time `time`, rounded to the millisecond.
    pub fn to_calendar(&self, time: f64) -> Result<DateTime<Utc>, SimulatorError> {
        let millis = time * self.unit.millis();
        if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
            return Err(SimulatorError::InvalidTime(time.to_string()));
        }
        TimeDelta::try_milliseconds(millis.round() as i64)
            .and_then(|offset| self.epoch.checked_add_signed(offset))
            .ok_or_else(|| SimulatorError::InvalidTime(format!("{time} is outside the calendar range")))
    }

    pub fn now(&self, ctx: &SimContext<f64>) -> Result<DateTime<Utc>, SimulatorError> {
        self.to_calendar(ctx.now())
    }

    pub fn schedule_at_calendar(
        &self,
        ctx: &SimContext<f64>,
        at: DateTime<Utc>,
        priority: Priority,
        action: Action<f64>,
    ) -> Result<EventHandle<f64>, SimulatorError> {
        ctx.schedule_abs(self.to_sim_time(at), priority, action)
    }

    pub fn schedule_after(
        &self,
        ctx: &SimContext<f64>,
        delay: TimeDelta,
        priority: Priority,
        action: Action<f64>,
    ) -> Result<EventHandle<f64>, SimulatorError> {
        ctx.schedule_rel(delay.num_milliseconds() as f64 / self.unit.millis(), priority, action)
    }
}
