// src/event/mod.rs
//! Simulation events.
//!
//! A [`SimEvent`] pairs an absolute execution time, a [`Priority`], a process
//! unique [`EventId`] and a deferred [`Action`]. Events are totally ordered:
//! earlier time first, then higher priority, then lower id.

pub mod list;
pub mod registry;

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExecutionError, SimEventError};
use crate::simulator::SimContext;
use crate::time::SimTime;

/// Result of a model action.
pub type ActionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Boxed closure executed by a [`Action::Direct`] event.
pub type ActionFn<T> = Box<dyn FnOnce(&SimContext<T>) -> ActionResult + Send>;

/// Selector that addresses a registered class constructor.
pub const CONSTRUCTOR: &str = "<init>";

// Process-wide, never reset; only `EventId::next` touches it.
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique, strictly increasing event identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    fn next() -> Self {
        EventId(NEXT_EVENT_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

/// Event priority. Among events with equal time the higher priority runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(i16);

impl Priority {
    pub const MIN: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const MAX: Priority = Priority(10);
    /// Reserved for kernel markers that must precede user events at the same instant.
    pub(crate) const KERNEL_MAX: Priority = Priority(11);

    pub fn new(value: i16) -> Result<Self, SimEventError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Priority(value))
        } else {
            Err(SimEventError::InvalidPriority {
                priority: value,
                min: Self::MIN.0,
                max: Self::MAX.0,
            })
        }
    }

    pub fn value(self) -> i16 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl TryFrom<i16> for Priority {
    type Error = SimEventError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A call resolved by name through the simulator's
/// [`InvocationRegistry`](registry::InvocationRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedInvocation {
    pub target: String,
    pub selector: String,
    pub args: Vec<Value>,
}

impl NamedInvocation {
    pub fn describe(&self) -> String {
        format!("{}.{}({} args)", self.target, self.selector, self.args.len())
    }
}

/// The deferred work carried by an event.
pub enum Action<T: SimTime> {
    Direct(ActionFn<T>),
    Named(NamedInvocation),
}

impl<T: SimTime> Action<T> {
    pub fn direct<F>(f: F) -> Self
    where
        F: FnOnce(&SimContext<T>) -> ActionResult + Send + 'static,
    {
        Action::Direct(Box::new(f))
    }

    pub fn named(target: impl Into<String>, selector: impl Into<String>, args: Vec<Value>) -> Self {
        Action::Named(NamedInvocation {
            target: target.into(),
            selector: selector.into(),
            args,
        })
    }
}

impl<T: SimTime> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Direct(_) => f.write_str("Direct(<closure>)"),
            Action::Named(invocation) => f.debug_tuple("Named").field(invocation).finish(),
        }
    }
}

/// Copyable identity of a scheduled event; used to peek at and cancel it.
#[derive(Debug, Clone, Copy)]
pub struct EventHandle<T: SimTime> {
    time: T,
    priority: Priority,
    id: EventId,
}

impl<T: SimTime> EventHandle<T> {
    pub fn time(&self) -> T {
        self.time
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn id(&self) -> EventId {
        self.id
    }
}

impl<T: SimTime> PartialEq for EventHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: SimTime> Eq for EventHandle<T> {}

impl<T: SimTime> PartialOrd for EventHandle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: SimTime> Ord for EventHandle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .time_cmp(&other.time)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl<T: SimTime> fmt::Display for EventHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}[{}]", self.id, self.time, self.priority)
    }
}

/// A scheduled, time-stamped, priority-tagged deferred action.
pub struct SimEvent<T: SimTime> {
    handle: EventHandle<T>,
    action: Action<T>,
}

impl<T: SimTime> SimEvent<T> {
    /// Builds an event with a raw priority, validating both time and priority.
    pub fn new(time: T, priority: i16, action: Action<T>) -> Result<Self, SimEventError> {
        Self::with_priority(time, Priority::new(priority)?, action)
    }

    pub fn with_priority(time: T, priority: Priority, action: Action<T>) -> Result<Self, SimEventError> {
        if !time.is_valid() {
            return Err(SimEventError::InvalidTime(time.to_string()));
        }
        Ok(Self::assemble(time, priority, action))
    }

    pub(crate) fn kernel(time: T, priority: Priority, action: Action<T>) -> Self {
        Self::assemble(time, priority, action)
    }

    fn assemble(time: T, priority: Priority, action: Action<T>) -> Self {
        SimEvent {
            handle: EventHandle {
                time,
                priority,
                id: EventId::next(),
            },
            action,
        }
    }

    pub fn execution_time(&self) -> T {
        self.handle.time
    }

    pub fn priority(&self) -> Priority {
        self.handle.priority
    }

    pub fn id(&self) -> EventId {
        self.handle.id
    }

    pub fn handle(&self) -> EventHandle<T> {
        self.handle
    }

    pub fn action(&self) -> &Action<T> {
        &self.action
    }

    /// Human readable description of the action target, for logs.
    pub fn describe(&self) -> String {
        match &self.action {
            Action::Direct(_) => format!("closure {}", self.handle.id),
            Action::Named(invocation) => invocation.describe(),
        }
    }

    /// Runs the action. Panics inside the action are captured as
    /// [`ExecutionError::InvocationFailed`].
    pub fn execute(self, ctx: &SimContext<T>) -> Result<(), ExecutionError> {
        let target = self.describe();
        match self.action {
            Action::Direct(f) => run_guarded(&target, || f(ctx)),
            Action::Named(invocation) => ctx.registry().invoke(ctx, &invocation),
        }
    }
}

impl<T: SimTime> fmt::Debug for SimEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEvent")
            .field("time", &self.handle.time)
            .field("priority", &self.handle.priority)
            .field("id", &self.handle.id)
            .field("action", &self.action)
            .finish()
    }
}

impl<T: SimTime> PartialEq for SimEvent<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<T: SimTime> Eq for SimEvent<T> {}

impl<T: SimTime> PartialOrd for SimEvent<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: SimTime> Ord for SimEvent<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.handle.cmp(&other.handle)
    }
}

pub(crate) fn run_guarded<F>(target: &str, f: F) -> Result<(), ExecutionError>
where
    F: FnOnce() -> ActionResult,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ExecutionError::InvocationFailed {
            target: target.to_string(),
            message: e.to_string(),
        }),
        Err(payload) => Err(ExecutionError::InvocationFailed {
            target: target.to_string(),
            message: format!("panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
