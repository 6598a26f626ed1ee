// src/simulator/notify.rs
//! Lifecycle notifications.
//!
//! Listeners registered with [`Notifier::add_listener`] are called
//! synchronously on the thread that executes events. Every notification is
//! also published on a `tokio::sync::broadcast` channel for async observers;
//! slow receivers lose messages instead of slowing the kernel down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures_core::stream::Stream;
use tokio::sync::broadcast;

use crate::event::{EventId, Priority};
use crate::sync;
use crate::time::SimTime;

#[derive(Debug, Clone, PartialEq)]
pub enum SimulatorEvent<T: SimTime> {
    SimulatorStarted { time: T },
    SimulatorStopped { time: T },
    StartReplication { time: T },
    Warmup { time: T },
    TimeChanged { time: T },
    EndReplication { time: T },
    EventFailed {
        time: T,
        id: EventId,
        priority: Priority,
        target: String,
        error: String,
    },
    /// Real-time pacing fell behind the wall clock by `lag_secs`.
    Drift { time: T, lag_secs: f64 },
}

impl<T: SimTime> SimulatorEvent<T> {
    pub fn time(&self) -> T {
        match self {
            SimulatorEvent::SimulatorStarted { time }
            | SimulatorEvent::SimulatorStopped { time }
            | SimulatorEvent::StartReplication { time }
            | SimulatorEvent::Warmup { time }
            | SimulatorEvent::TimeChanged { time }
            | SimulatorEvent::EndReplication { time }
            | SimulatorEvent::EventFailed { time, .. }
            | SimulatorEvent::Drift { time, .. } => *time,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SimulatorEvent::SimulatorStarted { .. } => "SimulatorStarted",
            SimulatorEvent::SimulatorStopped { .. } => "SimulatorStopped",
            SimulatorEvent::StartReplication { .. } => "StartReplication",
            SimulatorEvent::Warmup { .. } => "Warmup",
            SimulatorEvent::TimeChanged { .. } => "TimeChanged",
            SimulatorEvent::EndReplication { .. } => "EndReplication",
            SimulatorEvent::EventFailed { .. } => "EventFailed",
            SimulatorEvent::Drift { .. } => "Drift",
        }
    }
}

pub trait SimulatorListener<T: SimTime>: Send + Sync {
    fn notify(&self, event: &SimulatorEvent<T>);
}

impl<T, F> SimulatorListener<T> for F
where
    T: SimTime,
    F: Fn(&SimulatorEvent<T>) + Send + Sync,
{
    fn notify(&self, event: &SimulatorEvent<T>) {
        self(event)
    }
}

/// Identifies a registered listener for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct Notifier<T: SimTime> {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn SimulatorListener<T>>)>>,
    next_listener: AtomicU64,
    sender: broadcast::Sender<SimulatorEvent<T>>,
}

impl<T: SimTime> Notifier<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            sender,
        }
    }

    pub fn add_listener(&self, listener: impl SimulatorListener<T> + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        sync::write(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = sync::write(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn clear_listeners(&self) {
        sync::write(&self.listeners).clear();
    }

    pub fn listener_count(&self) -> usize {
        sync::read(&self.listeners).len()
    }

    /// Delivers `event` to every listener, then to the broadcast channel.
    /// The listener list is copied first so a listener may register others.
    pub fn fire(&self, event: SimulatorEvent<T>) {
        tracing::trace!("Notification {} at {}", event.kind(), event.time());
        let listeners: Vec<_> = sync::read(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.notify(&event);
        }
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimulatorEvent<T>> {
        self.sender.subscribe()
    }

    /// Stream of notifications for async observers. Messages dropped because
    /// the receiver lagged are skipped; the stream ends when the notifier is dropped.
    pub fn notifications(&self) -> impl Stream<Item = SimulatorEvent<T>> + Send + 'static {
        let mut receiver = self.subscribe();
        async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Notification stream lagged, skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
