// src/event/list.rs
//! The pending-event list.
//!
//! [`EventList`] serializes every operation behind one mutex, which makes it
//! safe for any number of producer threads and the single executor thread.
//! The backing container is chosen with [`StoreKind`]:
//!
//! - [`TreeStore`]: ordered map, O(log n) insert, pop, remove and contains.
//!   Prefer it when events are cancelled often.
//! - [`HeapStore`]: binary heap, O(log n) insert and pop, O(n) remove.
//!   Prefer it when cancellation is rare.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{EventHandle, EventId, SimEvent};
use crate::sync;
use crate::time::SimTime;

/// Ordered container of pending events. Implementations need not be thread
/// safe; [`EventList`] provides the locking.
pub trait EventStore<T: SimTime>: Send {
    fn insert(&mut self, event: SimEvent<T>);
    fn peek_first(&self) -> Option<EventHandle<T>>;
    fn pop_first(&mut self) -> Option<SimEvent<T>>;
    fn remove(&mut self, handle: &EventHandle<T>) -> Option<SimEvent<T>>;
    fn contains(&self, handle: &EventHandle<T>) -> bool;
    fn clear(&mut self);
    fn len(&self) -> usize;
    /// All pending handles in ascending event order.
    fn snapshot(&self) -> Vec<EventHandle<T>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Tree,
    Heap,
}

impl StoreKind {
    pub fn create<T: SimTime>(self) -> Box<dyn EventStore<T>> {
        match self {
            StoreKind::Tree => Box::new(TreeStore::new()),
            StoreKind::Heap => Box::new(HeapStore::new()),
        }
    }
}

// Two pending events comparing equal means a duplicated id; ordering between
// them would be arbitrary, so refuse to continue.
fn duplicate_event(handle: &EventHandle<impl SimTime>) -> ! {
    panic!("event list ordering tie: {handle} is already pending")
}

pub struct TreeStore<T: SimTime> {
    events: BTreeMap<EventHandle<T>, SimEvent<T>>,
}

impl<T: SimTime> TreeStore<T> {
    pub fn new() -> Self {
        Self {
            events: BTreeMap::new(),
        }
    }
}

impl<T: SimTime> Default for TreeStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SimTime> EventStore<T> for TreeStore<T> {
    fn insert(&mut self, event: SimEvent<T>) {
        let handle = event.handle();
        if self.events.contains_key(&handle) {
            duplicate_event(&handle);
        }
        self.events.insert(handle, event);
    }

    fn peek_first(&self) -> Option<EventHandle<T>> {
        self.events.keys().next().copied()
    }

    fn pop_first(&mut self) -> Option<SimEvent<T>> {
        self.events.pop_first().map(|(_, event)| event)
    }

    fn remove(&mut self, handle: &EventHandle<T>) -> Option<SimEvent<T>> {
        self.events.remove(handle)
    }

    fn contains(&self, handle: &EventHandle<T>) -> bool {
        self.events.contains_key(handle)
    }

    fn clear(&mut self) {
        self.events.clear();
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn snapshot(&self) -> Vec<EventHandle<T>> {
        self.events.keys().copied().collect()
    }
}

pub struct HeapStore<T: SimTime> {
    heap: BinaryHeap<Reverse<SimEvent<T>>>,
    pending: HashSet<EventId>,
}

impl<T: SimTime> HeapStore<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
        }
    }
}

impl<T: SimTime> Default for HeapStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SimTime> EventStore<T> for HeapStore<T> {
    fn insert(&mut self, event: SimEvent<T>) {
        if !self.pending.insert(event.id()) {
            duplicate_event(&event.handle());
        }
        self.heap.push(Reverse(event));
    }

    fn peek_first(&self) -> Option<EventHandle<T>> {
        self.heap.peek().map(|Reverse(event)| event.handle())
    }

    fn pop_first(&mut self) -> Option<SimEvent<T>> {
        let Reverse(event) = self.heap.pop()?;
        self.pending.remove(&event.id());
        Some(event)
    }

    fn remove(&mut self, handle: &EventHandle<T>) -> Option<SimEvent<T>> {
        if !self.contains(handle) {
            return None;
        }
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        let removed = entries
            .iter()
            .position(|Reverse(event)| event.handle() == *handle)
            .map(|index| entries.swap_remove(index).0);
        self.heap = BinaryHeap::from(entries);
        if let Some(event) = &removed {
            self.pending.remove(&event.id());
        }
        removed
    }

    fn contains(&self, handle: &EventHandle<T>) -> bool {
        self.pending.contains(&handle.id())
            && self.heap.iter().any(|Reverse(event)| event.handle() == *handle)
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn snapshot(&self) -> Vec<EventHandle<T>> {
        let mut handles: Vec<_> = self.heap.iter().map(|Reverse(event)| event.handle()).collect();
        handles.sort();
        handles
    }
}

/// Concurrent-safe pending-event list.
pub struct EventList<T: SimTime> {
    store: Mutex<Box<dyn EventStore<T>>>,
    kind: StoreKind,
}

impl<T: SimTime> EventList<T> {
    pub fn new(kind: StoreKind) -> Self {
        Self {
            store: Mutex::new(kind.create()),
            kind,
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn insert(&self, event: SimEvent<T>) {
        sync::lock(&self.store).insert(event);
    }

    /// Handle of the earliest pending event. A copy is returned because the
    /// event itself stays behind the lock.
    pub fn peek_first(&self) -> Option<EventHandle<T>> {
        sync::lock(&self.store).peek_first()
    }

    pub fn pop_first(&self) -> Option<SimEvent<T>> {
        sync::lock(&self.store).pop_first()
    }

    /// Pops the earliest event only if `accept` approves its handle; the check
    /// and the removal happen under one lock acquisition.
    pub fn pop_first_if<F>(&self, accept: F) -> Option<SimEvent<T>>
    where
        F: FnOnce(&EventHandle<T>) -> bool,
    {
        let mut store = sync::lock(&self.store);
        match store.peek_first() {
            Some(first) if accept(&first) => store.pop_first(),
            _ => None,
        }
    }

    /// Cancels a pending event. Returns `false` when it already ran or was removed.
    pub fn remove(&self, handle: &EventHandle<T>) -> bool {
        sync::lock(&self.store).remove(handle).is_some()
    }

    pub fn contains(&self, handle: &EventHandle<T>) -> bool {
        sync::lock(&self.store).contains(handle)
    }

    pub fn clear(&self) {
        sync::lock(&self.store).clear();
    }

    pub fn len(&self) -> usize {
        sync::lock(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ascending iteration over the handles pending at the time of the call.
    /// Every call takes a fresh snapshot; changes made after the call are not
    /// reflected, so callers needing a consistent view must not assume the
    /// list still matches while they iterate.
    pub fn iter(&self) -> std::vec::IntoIter<EventHandle<T>> {
        sync::lock(&self.store).snapshot().into_iter()
    }
}

impl<T: SimTime> Default for EventList<T> {
    fn default() -> Self {
        Self::new(StoreKind::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;

    fn event(time: f64, priority: i16) -> SimEvent<f64> {
        SimEvent::new(time, priority, Action::direct(|_| Ok(()))).unwrap()
    }

    fn drain(list: &EventList<f64>) -> Vec<(f64, i16)> {
        std::iter::from_fn(|| list.pop_first())
            .map(|e| (e.execution_time(), e.priority().value()))
            .collect()
    }

    #[test]
    fn test_drain_order_both_stores() {
        for kind in [StoreKind::Tree, StoreKind::Heap] {
            let list = EventList::new(kind);
            list.insert(event(3.0, 5));
            list.insert(event(1.0, 5));
            list.insert(event(1.0, 10));
            list.insert(event(1.0, 1));
            assert_eq!(
                drain(&list),
                vec![(1.0, 10), (1.0, 5), (1.0, 1), (3.0, 5)],
                "store {kind:?}"
            );
            assert!(list.is_empty());
        }
    }

    #[test]
    fn test_peek_does_not_remove() {
        let list = EventList::new(StoreKind::Heap);
        assert!(list.peek_first().is_none());
        let e = event(2.0, 5);
        let handle = e.handle();
        list.insert(e);
        assert_eq!(list.peek_first(), Some(handle));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_remove_and_contains() {
        for kind in [StoreKind::Tree, StoreKind::Heap] {
            let list = EventList::new(kind);
            let a = event(1.0, 5);
            let b = event(2.0, 5);
            let (ha, hb) = (a.handle(), b.handle());
            list.insert(a);
            list.insert(b);

            assert!(list.contains(&ha));
            assert!(list.remove(&ha));
            assert!(!list.contains(&ha));
            assert!(!list.remove(&ha));
            assert_eq!(list.pop_first().map(|e| e.handle()), Some(hb));
            assert!(!list.remove(&hb));
        }
    }

    #[test]
    fn test_pop_first_if_leaves_rejected_event() {
        let list = EventList::new(StoreKind::Tree);
        list.insert(event(5.0, 5));
        assert!(list.pop_first_if(|h| h.time() <= 4.0).is_none());
        assert_eq!(list.len(), 1);
        assert!(list.pop_first_if(|h| h.time() <= 5.0).is_some());
    }

    #[test]
    fn test_iter_is_snapshot_in_order() {
        let list = EventList::new(StoreKind::Heap);
        for (t, p) in [(4.0, 5), (2.0, 1), (2.0, 9), (1.0, 5)] {
            list.insert(event(t, p));
        }
        let seen: Vec<_> = list.iter().map(|h| (h.time(), h.priority().value())).collect();
        assert_eq!(seen, vec![(1.0, 5), (2.0, 9), (2.0, 1), (4.0, 5)]);

        let iter = list.iter();
        list.clear();
        assert_eq!(iter.count(), 4);
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    #[should_panic(expected = "ordering tie")]
    fn test_duplicate_insert_is_fatal() {
        let mut store = TreeStore::new();
        let a = event(1.0, 5);
        let twin = SimEvent {
            handle: a.handle(),
            action: Action::direct(|_| Ok(())),
        };
        store.insert(a);
        store.insert(twin);
    }
}
