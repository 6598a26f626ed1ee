//! # Simulator Configuration
//!
//! A simulator and its replication can be described in TOML:
//!
//! ```toml
//! [replication]
//! start = 0.0
//! warmup = 100.0
//! end = 10000.0
//!
//! [executor]
//! store = "heap"
//! error_policy = "stop_on_error"
//! fixed_step = 0.5
//!
//! [realtime]
//! speed_factor = 10.0
//! sim_unit_secs = 1.0
//! drift_tolerance_ms = 250
//! ```
//!
//! - `[executor] fixed_step` switches to DESS stepping; leave it out for DEVS.
//! - The `[realtime]` table enables wall-clock pacing; without it the executor
//!   runs as fast as possible.
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use devsim_rs::config::SimulatorConfig;
//! let config: SimulatorConfig = toml::from_str("[replication]\nend = 50.0").unwrap();
//! assert!(config.validate().is_ok());
//! let sim = config.simulator::<f64>().unwrap();
//! let replication = config.replication::<f64>().unwrap();
//! assert_eq!(replication.end(), 50.0);
//! # drop(sim);
//! ```

// src/config.rs - Simulator configuration file
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SimulatorError;
use crate::event::list::StoreKind;
use crate::simulator::{ErrorPolicy, Pacing, RealTimeConfig, Replication, Simulator, SimulatorBuilder, Stepping};
use crate::simulator::DEFAULT_NOTIFICATION_CAPACITY;
use crate::time::SimTime;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<SimulatorError> for ConfigError {
    fn from(e: SimulatorError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

/// Top-level configuration: replication bounds, executor and optional pacing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub realtime: Option<RealTimeConfig>,
}

/// Replication bounds in model time units.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub start: f64,
    /// Defaults to `start`, i.e. no warmup period.
    #[serde(default)]
    pub warmup: Option<f64>,
    #[serde(default = "default_end")]
    pub end: f64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            warmup: None,
            end: default_end(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub fixed_step: Option<f64>,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            error_policy: ErrorPolicy::default(),
            fixed_step: None,
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.replication::<f64>()?;
        self.stepping::<f64>().validate()?;
        self.pacing().validate()?;
        if self.executor.notification_capacity == 0 {
            return Err(ConfigError::Invalid("notification_capacity must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn replication<T: SimTime>(&self) -> Result<Replication<T>, SimulatorError> {
        let r = &self.replication;
        Replication::new(
            T::from_f64(r.start),
            T::from_f64(r.warmup.unwrap_or(r.start)),
            T::from_f64(r.end),
        )
    }

    pub fn stepping<T: SimTime>(&self) -> Stepping<T> {
        match self.executor.fixed_step {
            Some(dt) => Stepping::FixedStep(T::from_f64(dt)),
            None => Stepping::EventDriven,
        }
    }

    pub fn pacing(&self) -> Pacing {
        match self.realtime {
            Some(config) => Pacing::RealTime(config),
            None => Pacing::AsFastAsPossible,
        }
    }

    pub fn builder<T: SimTime>(&self) -> SimulatorBuilder<T> {
        SimulatorBuilder::new()
            .store(self.executor.store)
            .error_policy(self.executor.error_policy)
            .stepping(self.stepping())
            .pacing(self.pacing())
            .notification_capacity(self.executor.notification_capacity)
    }

    pub fn simulator<T: SimTime>(&self) -> Result<Simulator<T>, ConfigError> {
        Ok(self.builder().build()?)
    }
}

// Default value functions
fn default_end() -> f64 {
    1000.0
}

fn default_notification_capacity() -> usize {
    DEFAULT_NOTIFICATION_CAPACITY
}

/// Loads and validates a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<SimulatorConfig, ConfigError> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            return Err(ConfigError::Io(e));
        }
    };
    let config: SimulatorConfig = match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to parse config TOML: {}", e);
            return Err(ConfigError::Toml(e));
        }
    };
    config.validate()?;
    Ok(config)
}
