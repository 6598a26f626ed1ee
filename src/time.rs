// src/time.rs
//! Simulation time.
//!
//! The kernel is generic over the numeric type used for simulated time. Any
//! type implementing [`SimTime`] can drive a [`Simulator`](crate::Simulator):
//! plain `f64` model units, integer `u64` ticks, or [`SimDuration`] wrapping `std::time::Duration`.
//! Time values must form a total order; floating point NaN and infinities are
//! rejected wherever a time enters the kernel.

use std::cmp::Ordering;
use std::fmt::{self, Debug, Display};
use std::time::Duration;

/// Ordered numeric value used as the simulation clock.
pub trait SimTime:
    Copy + Debug + Display + PartialEq + PartialOrd + Send + Sync + 'static
{
    /// The origin of simulated time.
    fn zero() -> Self;

    /// `false` for values that cannot be scheduled (NaN, infinities).
    fn is_valid(&self) -> bool;

    /// Total order over valid values.
    fn time_cmp(&self, other: &Self) -> Ordering;

    /// `self + delay`.
    fn plus(self, delay: Self) -> Self;

    /// `self - earlier`, saturating at zero for unsigned representations.
    fn minus(self, earlier: Self) -> Self;

    /// `true` when the value represents a negative offset.
    fn is_negative(&self) -> bool;

    /// Lossy conversion used for wall-clock pacing and reporting.
    fn to_f64(self) -> f64;

    /// Lossy conversion used when times come from configuration files.
    fn from_f64(value: f64) -> Self;

    fn min_time(self, other: Self) -> Self {
        if self.time_cmp(&other) == Ordering::Greater {
            other
        } else {
            self
        }
    }
}

impl SimTime for f64 {
    fn zero() -> Self {
        0.0
    }

    fn is_valid(&self) -> bool {
        self.is_finite()
    }

    fn time_cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }

    fn plus(self, delay: Self) -> Self {
        self + delay
    }

    fn minus(self, earlier: Self) -> Self {
        self - earlier
    }

    fn is_negative(&self) -> bool {
        *self < 0.0
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

impl SimTime for u64 {
    fn zero() -> Self {
        0
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn time_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn plus(self, delay: Self) -> Self {
        self.saturating_add(delay)
    }

    fn minus(self, earlier: Self) -> Self {
        self.saturating_sub(earlier)
    }

    fn is_negative(&self) -> bool {
        false
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        if value.is_nan() || value <= 0.0 {
            0
        } else {
            value.round() as u64
        }
    }
}

/// Wall-style clock for models that think in seconds and nanoseconds.
///
/// `std::time::Duration` has no `Display`, so the kernel wraps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimDuration(pub Duration);

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(Duration::ZERO);
    pub const MAX: SimDuration = SimDuration(Duration::MAX);

    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }
}

impl From<Duration> for SimDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs_f64())
    }
}

impl SimTime for SimDuration {
    fn zero() -> Self {
        SimDuration::ZERO
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn time_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn plus(self, delay: Self) -> Self {
        Self(self.0.saturating_add(delay.0))
    }

    fn minus(self, earlier: Self) -> Self {
        Self(self.0.saturating_sub(earlier.0))
    }

    fn is_negative(&self) -> bool {
        false
    }

    fn to_f64(self) -> f64 {
        self.0.as_secs_f64()
    }

    fn from_f64(value: f64) -> Self {
        Self(Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX))
    }
}
