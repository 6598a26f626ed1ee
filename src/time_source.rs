// src/time_source.rs
//! Wall-clock abstraction used by real-time pacing.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use crate::sync;

pub trait TimeInterface: Send + Sync {
    fn now_monotonic(&self) -> Instant;
    fn now_wallclock(&self) -> SystemTime;
    fn sleep(&self, duration: Duration);

    /// Gives other threads a chance to run after a long burst of events.
    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// Implements [`TimeInterface`] with the standard library clocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdTimeSource;

impl TimeInterface for StdTimeSource {
    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }

    fn now_wallclock(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// A clock that only moves when slept on. Pacing against it never blocks,
/// which keeps real-time runs deterministic in tests and batch replays.
#[derive(Debug)]
pub struct ManualTimeSource {
    origin: Instant,
    wall_origin: SystemTime,
    elapsed: Mutex<Duration>,
    slept: Mutex<Vec<Duration>>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: SystemTime::now(),
            elapsed: Mutex::new(Duration::ZERO),
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *sync::lock(&self.elapsed) += by;
    }

    pub fn elapsed(&self) -> Duration {
        *sync::lock(&self.elapsed)
    }

    /// Every sleep requested so far, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        sync::lock(&self.slept).clone()
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeInterface for ManualTimeSource {
    fn now_monotonic(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn now_wallclock(&self) -> SystemTime {
        self.wall_origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        sync::lock(&self.slept).push(duration);
        self.advance(duration);
    }
}
