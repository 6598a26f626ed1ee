// src/simulator/replication.rs
use std::cmp::Ordering;

use uuid::Uuid;

use crate::error::SimulatorError;
use crate::time::SimTime;

/// One bounded run of a model: `start <= warmup <= end`.
///
/// The executor fires `StartReplication` at `start`, `Warmup` at `warmup`
/// (statistics collectors reset there) and `EndReplication` at `end`. Events
/// scheduled after `end` never execute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Replication<T: SimTime> {
    id: Uuid,
    start: T,
    warmup: T,
    end: T,
}

impl<T: SimTime> Replication<T> {
    pub fn new(start: T, warmup: T, end: T) -> Result<Self, SimulatorError> {
        for (name, value) in [("start", start), ("warmup", warmup), ("end", end)] {
            if !value.is_valid() {
                return Err(SimulatorError::InvalidReplication(format!("{name} time {value} is not a valid time")));
            }
        }
        if warmup.time_cmp(&start) == Ordering::Less {
            return Err(SimulatorError::InvalidReplication(format!(
                "warmup {warmup} precedes start {start}"
            )));
        }
        if end.time_cmp(&warmup) == Ordering::Less {
            return Err(SimulatorError::InvalidReplication(format!(
                "end {end} precedes warmup {warmup}"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            start,
            warmup,
            end,
        })
    }

    /// Builds `[start, start + warmup_period, start + run_length]`.
    pub fn from_run_length(start: T, warmup_period: T, run_length: T) -> Result<Self, SimulatorError> {
        if warmup_period.is_negative() || run_length.is_negative() {
            return Err(SimulatorError::InvalidReplication(format!(
                "negative warmup period {warmup_period} or run length {run_length}"
            )));
        }
        Self::new(start, start.plus(warmup_period), start.plus(run_length))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn start(&self) -> T {
        self.start
    }

    pub fn warmup(&self) -> T {
        self.warmup
    }

    pub fn end(&self) -> T {
        self.end
    }

    pub fn has_warmup_period(&self) -> bool {
        self.warmup.time_cmp(&self.start) == Ordering::Greater
    }

    pub fn contains(&self, time: T) -> bool {
        time.time_cmp(&self.start) != Ordering::Less && time.time_cmp(&self.end) != Ordering::Greater
    }
}
