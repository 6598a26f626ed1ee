// src/error.rs
//! Error taxonomy for the kernel.
//!
//! Configuration and causality errors are returned synchronously from the call
//! that introduced them. Execution errors are produced per event and handed to
//! the executor's error policy. Consistency violations abort the loop.

use thiserror::Error;

use crate::simulator::RunState;

/// Errors raised while constructing a [`SimEvent`](crate::SimEvent).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimEventError {
    #[error("Invalid priority {priority}: must be between {min} and {max}")]
    InvalidPriority { priority: i16, min: i16, max: i16 },
    #[error("Invalid execution time: {0}")]
    InvalidTime(String),
}

/// Failure of a single event's action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Target '{0}' is not registered")]
    TargetUnresolvable(String),
    #[error("Method '{selector}' cannot be resolved on target '{target}'")]
    MethodUnresolvable { target: String, selector: String },
    #[error("Invocation of {target} failed: {message}")]
    InvocationFailed { target: String, message: String },
    #[error("Constructor invoked on instance target '{0}'")]
    ConstructorOnInstance(String),
}

/// Errors returned by the simulator's scheduling and control API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulatorError {
    #[error("Cannot schedule event at {requested} before current time {current}")]
    PastSchedule { requested: f64, current: f64 },
    #[error("Negative delay: {0}")]
    NegativeDelay(f64),
    #[error("Invalid simulation time: {0}")]
    InvalidTime(String),
    #[error(transparent)]
    Event(#[from] SimEventError),
    #[error("Operation '{operation}' is not allowed in state {state}")]
    IllegalState {
        operation: &'static str,
        state: RunState,
    },
    #[error("Events cannot be scheduled while the model is being constructed; use schedule_on_init")]
    SchedulingDuringConstruction,
    #[error("Invalid replication: {0}")]
    InvalidReplication(String),
    #[error("Invalid executor configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Model construction failed: {0}")]
    ModelConstruction(String),
    #[error("Internal consistency violation: {0}")]
    Consistency(String),
    #[error("Event execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Executor thread error: {0}")]
    Executor(String),
}

/// Errors returned by [`Resource`](crate::Resource).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    #[error("Invalid amount {0}: must be a non-negative number")]
    InvalidAmount(f64),
    #[error("Requested amount {amount} exceeds total capacity {capacity}")]
    AmountExceedsCapacity { amount: f64, capacity: f64 },
    #[error("Invalid capacity {capacity}: {reason}")]
    InvalidCapacity { capacity: f64, reason: String },
    #[error("Grant could not be scheduled: {0}")]
    Scheduling(#[from] SimulatorError),
}
