// src/resource.rs
//! Seize/release arbitration of a shared capacity.
//!
//! A [`Resource`] grants capacity immediately when it fits and otherwise
//! queues the request, ordered by priority (highest first) and then arrival.
//! Grants are always delivered through a zero-delay event, so a requestor
//! observes its grant at the next event rather than inside the call that
//! caused it.
//!
//! On release the queue is scanned in order and stops at the first request
//! that does not fit: a large request blocks smaller ones queued behind it.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::error::ResourceError;
use crate::event::{Action, ActionResult, EventHandle, Priority};
use crate::simulator::SimContext;
use crate::sync;
use crate::time::SimTime;

/// Receives capacity granted by a [`Resource`].
pub trait ResourceRequestor<T: SimTime>: Send + Sync {
    fn capacity_granted(&self, ctx: &SimContext<T>, resource: &str, amount: f64) -> ActionResult;
}

impl<T, F> ResourceRequestor<T> for F
where
    T: SimTime,
    F: Fn(&SimContext<T>, &str, f64) -> ActionResult + Send + Sync,
{
    fn capacity_granted(&self, ctx: &SimContext<T>, resource: &str, amount: f64) -> ActionResult {
        self(ctx, resource, amount)
    }
}

pub type Requestor<T> = Arc<dyn ResourceRequestor<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestOutcome<T: SimTime> {
    /// Claimed now; the grant event is pending.
    Granted(EventHandle<T>),
    /// Waiting in the queue.
    Queued(RequestId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceEvent<T: SimTime> {
    UtilizationChanged { time: T, claimed: f64, capacity: f64 },
    QueueLengthChanged { time: T, length: usize },
}

pub trait ResourceListener<T: SimTime>: Send + Sync {
    fn resource_changed(&self, resource: &str, event: &ResourceEvent<T>);
}

impl<T, F> ResourceListener<T> for F
where
    T: SimTime,
    F: Fn(&str, &ResourceEvent<T>) + Send + Sync,
{
    fn resource_changed(&self, resource: &str, event: &ResourceEvent<T>) {
        self(resource, event)
    }
}

struct PendingRequest<T: SimTime> {
    id: RequestId,
    amount: f64,
    priority: Priority,
    requestor: Requestor<T>,
}

type QueueKey = (Reverse<Priority>, u64);

struct ResourceState<T: SimTime> {
    capacity: f64,
    claimed: f64,
    queue: BTreeMap<QueueKey, PendingRequest<T>>,
    next_sequence: u64,
}

pub struct Resource<T: SimTime> {
    name: Arc<str>,
    ctx: SimContext<T>,
    state: Mutex<ResourceState<T>>,
    listeners: RwLock<Vec<Arc<dyn ResourceListener<T>>>>,
}

fn check_amount(amount: f64) -> Result<(), ResourceError> {
    if amount.is_finite() && amount >= 0.0 {
        Ok(())
    } else {
        Err(ResourceError::InvalidAmount(amount))
    }
}

fn check_capacity(capacity: f64) -> Result<(), ResourceError> {
    if capacity.is_finite() && capacity >= 0.0 {
        Ok(())
    } else {
        Err(ResourceError::InvalidCapacity {
            capacity,
            reason: "must be a non-negative number".to_string(),
        })
    }
}

impl<T: SimTime> Resource<T> {
    pub fn new(ctx: &SimContext<T>, name: impl Into<String>, capacity: f64) -> Result<Self, ResourceError> {
        check_capacity(capacity)?;
        Ok(Self {
            name: Arc::from(name.into()),
            ctx: ctx.clone(),
            state: Mutex::new(ResourceState {
                capacity,
                claimed: 0.0,
                queue: BTreeMap::new(),
                next_sequence: 0,
            }),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> f64 {
        sync::lock(&self.state).capacity
    }

    pub fn claimed_capacity(&self) -> f64 {
        sync::lock(&self.state).claimed
    }

    pub fn available_capacity(&self) -> f64 {
        let state = sync::lock(&self.state);
        state.capacity - state.claimed
    }

    pub fn queue_length(&self) -> usize {
        sync::lock(&self.state).queue.len()
    }

    pub fn add_listener(&self, listener: impl ResourceListener<T> + 'static) {
        sync::write(&self.listeners).push(Arc::new(listener));
    }

    /// Claims `amount` for `requestor`, or queues the request when it does
    /// not fit. Amounts larger than the whole capacity are rejected because
    /// they could never be granted.
    pub fn request_capacity(
        &self,
        amount: f64,
        requestor: Requestor<T>,
        priority: Priority,
    ) -> Result<RequestOutcome<T>, ResourceError> {
        check_amount(amount)?;
        let mut state = sync::lock(&self.state);
        if amount > state.capacity {
            return Err(ResourceError::AmountExceedsCapacity {
                amount,
                capacity: state.capacity,
            });
        }

        if state.claimed + amount <= state.capacity {
            let grant = self.schedule_grant(amount, &requestor, priority)?;
            state.claimed += amount;
            let (claimed, capacity) = (state.claimed, state.capacity);
            drop(state);
            tracing::debug!("{}: granted {} immediately ({}/{})", self.name, amount, claimed, capacity);
            self.fire_utilization(claimed, capacity);
            return Ok(RequestOutcome::Granted(grant));
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let id = RequestId(sequence);
        state.queue.insert(
            (Reverse(priority), sequence),
            PendingRequest {
                id,
                amount,
                priority,
                requestor,
            },
        );
        let length = state.queue.len();
        drop(state);
        tracing::debug!("{}: queued {} for {} at {}", self.name, id, amount, priority);
        self.fire_queue_length(length);
        Ok(RequestOutcome::Queued(id))
    }

    /// Returns `amount` to the resource (the claim floors at zero) and grants
    /// waiting requests in order while they fit.
    pub fn release_capacity(&self, amount: f64) -> Result<(), ResourceError> {
        check_amount(amount)?;
        let mut state = sync::lock(&self.state);
        state.claimed = (state.claimed - amount).max(0.0);
        self.grant_waiting(state)
    }

    /// Changes the capacity. Shrinking below the current claim is rejected.
    pub fn set_capacity(&self, capacity: f64) -> Result<(), ResourceError> {
        check_capacity(capacity)?;
        let mut state = sync::lock(&self.state);
        if capacity < state.claimed {
            return Err(ResourceError::InvalidCapacity {
                capacity,
                reason: format!("below the claimed capacity {}", state.claimed),
            });
        }
        state.capacity = capacity;
        // Requests that can no longer ever fit are dropped.
        let before = state.queue.len();
        state.queue.retain(|_, request| request.amount <= capacity);
        if state.queue.len() != before {
            tracing::warn!(
                "{}: dropped {} waiting requests larger than the new capacity {}",
                self.name,
                before - state.queue.len(),
                capacity
            );
        }
        self.grant_waiting(state)
    }

    pub fn cancel_request(&self, id: RequestId) -> bool {
        self.withdraw(|request| request.id == id) > 0
    }

    /// Withdraws every waiting request made by `requestor`.
    pub fn cancel_requests_of(&self, requestor: &Requestor<T>) -> usize {
        let target = Arc::as_ptr(requestor) as *const ();
        self.withdraw(|request| Arc::as_ptr(&request.requestor) as *const () == target)
    }

    fn withdraw(&self, matches: impl Fn(&PendingRequest<T>) -> bool) -> usize {
        let mut state = sync::lock(&self.state);
        let before = state.queue.len();
        state.queue.retain(|_, request| !matches(request));
        let removed = before - state.queue.len();
        let length = state.queue.len();
        drop(state);
        if removed > 0 {
            self.fire_queue_length(length);
        }
        removed
    }

    fn grant_waiting(&self, mut guard: MutexGuard<'_, ResourceState<T>>) -> Result<(), ResourceError> {
        let state = &mut *guard;
        let queue_before = state.queue.len();
        let mut result = Ok(());
        while let Some(entry) = state.queue.first_entry() {
            let request = entry.get();
            if state.claimed + request.amount > state.capacity {
                break;
            }
            match self.schedule_grant(request.amount, &request.requestor, request.priority) {
                Ok(_) => {
                    let request = entry.remove();
                    state.claimed += request.amount;
                    tracing::debug!("{}: granted {} ({})", self.name, request.id, request.amount);
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let (claimed, capacity, length) = (state.claimed, state.capacity, state.queue.len());
        drop(guard);
        self.fire_utilization(claimed, capacity);
        if length != queue_before {
            self.fire_queue_length(length);
        }
        result
    }

    fn schedule_grant(
        &self,
        amount: f64,
        requestor: &Requestor<T>,
        priority: Priority,
    ) -> Result<EventHandle<T>, ResourceError> {
        let requestor = Arc::clone(requestor);
        let name = Arc::clone(&self.name);
        let action = Action::direct(move |ctx: &SimContext<T>| requestor.capacity_granted(ctx, &name, amount));
        Ok(self.ctx.schedule_now(priority, action)?)
    }

    fn fire_utilization(&self, claimed: f64, capacity: f64) {
        self.fire(ResourceEvent::UtilizationChanged {
            time: self.ctx.now(),
            claimed,
            capacity,
        });
    }

    fn fire_queue_length(&self, length: usize) {
        self.fire(ResourceEvent::QueueLengthChanged {
            time: self.ctx.now(),
            length,
        });
    }

    fn fire(&self, event: ResourceEvent<T>) {
        let listeners: Vec<_> = sync::read(&self.listeners).iter().cloned().collect();
        for listener in listeners {
            listener.resource_changed(&self.name, &event);
        }
    }
}

impl<T: SimTime> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = sync::lock(&self.state);
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("capacity", &state.capacity)
            .field("claimed", &state.claimed)
            .field("queue_length", &state.queue.len())
            .finish()
    }
}
