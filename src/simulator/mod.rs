// src/simulator/mod.rs
//! The simulator and its executor loop.
//!
//! A [`Simulator`] owns the clock, the pending [`EventList`], the run state
//! and the current [`Replication`]. Model code talks to it through cloneable
//! [`SimContext`] handles, which may be used from any thread.
//!
//! Kernel state lives behind one mutex (`Core`) and the event list behind its
//! own; the lock order is always core, then list. The executor advances the
//! clock while holding the core lock, both during a pop and when it moves to
//! a step boundary or a run bound with nothing due, so a producer's
//! causality check and its insertion can never interleave with a time advance.
//! Actions run with no kernel lock held and may schedule freely.

pub mod notify;
pub mod replication;
pub mod state;
pub mod strategy;

use std::cmp::Ordering;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, SimulatorError};
use crate::event::list::{EventList, StoreKind};
use crate::event::registry::InvocationRegistry;
use crate::event::{Action, EventHandle, Priority, SimEvent};
use crate::sync;
use crate::time::SimTime;
use crate::time_source::{StdTimeSource, TimeInterface};

pub use notify::{ListenerId, Notifier, SimulatorEvent, SimulatorListener};
pub use replication::Replication;
pub use state::RunState;
pub use strategy::{Pacing, RealTimeConfig, Stepping};

use strategy::{Pace, Pacer, SpeedControl};

pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

/// What the executor does when an event's action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log, notify `EventFailed` and keep going.
    #[default]
    LogAndContinue,
    /// Log, notify, then stop the loop and surface the error.
    StopOnError,
}

/// A model builds its initial scheduled work when a replication is initialized.
///
/// Scheduling is rejected while `construct_model` runs; use
/// [`SimContext::schedule_on_init`] to queue work for the start time.
pub trait Model<T: SimTime> {
    fn construct_model(&mut self, ctx: &SimContext<T>) -> Result<(), Box<dyn Error + Send + Sync>>;
}

impl<T, F> Model<T> for F
where
    T: SimTime,
    F: FnMut(&SimContext<T>) -> Result<(), Box<dyn Error + Send + Sync>>,
{
    fn construct_model(&mut self, ctx: &SimContext<T>) -> Result<(), Box<dyn Error + Send + Sync>> {
        self(ctx)
    }
}

struct Core<T: SimTime> {
    current_time: T,
    state: RunState,
    replication: Option<Replication<T>>,
    replication_started: bool,
    replication_ended: bool,
    constructing: bool,
    init_callbacks: Vec<Action<T>>,
    current_event: Option<EventHandle<T>>,
}

impl<T: SimTime> Core<T> {
    fn new() -> Self {
        Self {
            current_time: T::zero(),
            state: RunState::NotInitialized,
            replication: None,
            replication_started: false,
            replication_ended: false,
            constructing: false,
            init_callbacks: Vec::new(),
            current_event: None,
        }
    }

    fn check_scheduling(&self) -> Result<(), SimulatorError> {
        if self.constructing {
            return Err(SimulatorError::SchedulingDuringConstruction);
        }
        if !self.state.accepts_scheduling() {
            return Err(SimulatorError::IllegalState {
                operation: "schedule",
                state: self.state,
            });
        }
        Ok(())
    }

    fn can_run(&self) -> bool {
        match self.state {
            RunState::Initialized => true,
            RunState::Stopped => self.replication.is_some() && !self.replication_ended,
            _ => false,
        }
    }
}

struct Executor<T: SimTime> {
    stepping: Stepping<T>,
    pacer: Pacer,
    next_step: Option<T>,
}

/// How a run of the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Stopped by request, by the event budget or at a `run_up_to` bound.
    Paused,
    /// No event remains at or before the replication end.
    Ended,
}

struct Shared<T: SimTime> {
    core: Mutex<Core<T>>,
    events: EventList<T>,
    registry: InvocationRegistry<T>,
    notifier: Notifier<T>,
    // Held for the whole of a run so only one thread ever executes events.
    executor: Mutex<Executor<T>>,
    stop_requested: AtomicBool,
    speed: SpeedControl,
    error_policy: ErrorPolicy,
}

impl<T: SimTime> Shared<T> {
    fn current_time(&self) -> T {
        sync::lock(&self.core).current_time
    }

    fn replication_end(&self) -> Result<T, SimulatorError> {
        let core = sync::lock(&self.core);
        core.replication
            .map(|r| r.end())
            .ok_or(SimulatorError::IllegalState {
                operation: "run",
                state: core.state,
            })
    }

    /// Moves the simulator into `Starting`; the caller then drives the loop.
    fn begin_run(&self, operation: &'static str) -> Result<(), SimulatorError> {
        let mut core = sync::lock(&self.core);
        if !core.can_run() {
            return Err(SimulatorError::IllegalState {
                operation,
                state: core.state,
            });
        }
        core.state = RunState::Starting;
        self.stop_requested.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn announce_start(&self) {
        let (time, first, warmup_now) = {
            let mut core = sync::lock(&self.core);
            // A stop requested while Starting leaves the state at Stopping.
            if core.state == RunState::Starting {
                core.state = RunState::Running;
            }
            let first = !core.replication_started;
            core.replication_started = true;
            let warmup_now = core.replication.is_some_and(|r| !r.has_warmup_period());
            (core.current_time, first, warmup_now)
        };
        tracing::info!("Simulator started at {}", time);
        self.notifier.fire(SimulatorEvent::SimulatorStarted { time });
        if first {
            self.notifier.fire(SimulatorEvent::StartReplication { time });
            if warmup_now {
                self.notifier.fire(SimulatorEvent::Warmup { time });
            }
        }
    }

    /// Runs the loop from `Starting` through to `Stopped`. Returns the number
    /// of events executed.
    fn drive(self: &Arc<Self>, bound: Option<T>, budget: Option<usize>) -> Result<usize, SimulatorError> {
        let mut executor = sync::lock(&self.executor);
        executor.pacer.reset();
        tracing::debug!(
            "Executor loop entered (bound {:?}, budget {:?}, real time {})",
            bound,
            budget,
            executor.pacer.is_real_time()
        );
        self.announce_start();

        let mut executed = 0;
        let outcome = self.execute_until(&mut executor, bound, budget, &mut executed);
        drop(executor);

        let (time, ended) = {
            let mut core = sync::lock(&self.core);
            core.current_event = None;
            core.state = RunState::Stopped;
            match &outcome {
                Ok(Exit::Ended) | Err(SimulatorError::Consistency(_)) => core.replication_ended = true,
                _ => {}
            }
            (core.current_time, matches!(outcome, Ok(Exit::Ended)))
        };
        if ended {
            tracing::info!("Replication ended at {}", time);
            self.notifier.fire(SimulatorEvent::EndReplication { time });
        }
        if let Err(e) = &outcome {
            tracing::error!("Executor loop aborted at {}: {}", time, e);
        }
        tracing::info!("Simulator stopped at {} after {} events", time, executed);
        self.notifier.fire(SimulatorEvent::SimulatorStopped { time });
        outcome.map(|_| executed)
    }

    fn execute_until(
        self: &Arc<Self>,
        executor: &mut Executor<T>,
        bound: Option<T>,
        budget: Option<usize>,
        executed: &mut usize,
    ) -> Result<Exit, SimulatorError> {
        let ctx = SimContext {
            shared: Arc::clone(self),
        };
        let end = self.replication_end()?;
        let limit = bound.map_or(end, |b| b.min_time(end));
        let within = |time: T| time.time_cmp(&limit) != Ordering::Greater;

        loop {
            if self.stop_requested.load(AtomicOrdering::SeqCst) {
                tracing::debug!("Stop request honoured at {}", self.current_time());
                return Ok(Exit::Paused);
            }
            if budget.is_some_and(|b| *executed >= b) {
                return Ok(Exit::Paused);
            }
            if let Some(speed_factor) = self.speed.take() {
                executor.pacer.set_speed_factor(speed_factor);
            }

            let now = self.current_time();
            let head = self.events.peek_first().filter(|h| within(h.time()));

            if let Stepping::FixedStep(dt) = executor.stepping {
                let boundary = *executor.next_step.get_or_insert(now.plus(dt));
                let step_first = head.is_none_or(|h| h.time().time_cmp(&boundary) == Ordering::Greater);
                if within(boundary) && step_first {
                    match executor.pacer.pace(now.to_f64(), boundary.to_f64()) {
                        Pace::Waited => continue,
                        Pace::Late { lag_secs } => self.report_drift(boundary, lag_secs),
                        Pace::Due => {}
                    }
                    if self.advance_if_idle(boundary) {
                        executor.next_step = Some(boundary.plus(dt));
                    }
                    continue;
                }
            }

            let Some(head) = head else {
                if self.advance_if_idle(limit) {
                    break;
                }
                continue;
            };
            match executor.pacer.pace(now.to_f64(), head.time().to_f64()) {
                Pace::Waited => continue,
                Pace::Late { lag_secs } => self.report_drift(head.time(), lag_secs),
                Pace::Due => {}
            }

            let (event, moved) = {
                let mut core = sync::lock(&self.core);
                let Some(event) = self.events.pop_first_if(|h| within(h.time())) else {
                    continue;
                };
                let time = event.execution_time();
                if time.time_cmp(&core.current_time) == Ordering::Less {
                    return Err(SimulatorError::Consistency(format!(
                        "event {} precedes current time {}",
                        event.handle(),
                        core.current_time
                    )));
                }
                let moved = time.time_cmp(&core.current_time) != Ordering::Equal;
                core.current_time = time;
                core.current_event = Some(event.handle());
                (event, moved)
            };
            let handle = event.handle();
            if moved {
                self.notifier.fire(SimulatorEvent::TimeChanged { time: handle.time() });
            }

            tracing::trace!("Executing {}", handle);
            let target = event.describe();
            let result = event.execute(&ctx);
            sync::lock(&self.core).current_event = None;
            *executed += 1;

            if let Err(error) = result {
                self.report_failure(&handle, target, &error);
                if self.error_policy == ErrorPolicy::StopOnError {
                    return Err(SimulatorError::Execution(error));
                }
            }
        }

        if limit.time_cmp(&end) == Ordering::Equal {
            Ok(Exit::Ended)
        } else {
            Ok(Exit::Paused)
        }
    }

    /// Moves the clock to `time` unless an event is pending at or before it.
    /// The check and the move share one core lock acquisition, so a producer
    /// cannot slip an event in between. Returns `false` when the clock stayed
    /// put because of such an event.
    fn advance_if_idle(&self, time: T) -> bool {
        let moved = {
            let mut core = sync::lock(&self.core);
            if self
                .events
                .peek_first()
                .is_some_and(|h| h.time().time_cmp(&time) != Ordering::Greater)
            {
                return false;
            }
            if time.time_cmp(&core.current_time) == Ordering::Greater {
                core.current_time = time;
                true
            } else {
                false
            }
        };
        if moved {
            self.notifier.fire(SimulatorEvent::TimeChanged { time });
        }
        true
    }

    fn report_failure(&self, handle: &EventHandle<T>, target: String, error: &ExecutionError) {
        tracing::error!(
            "Event {} failed at {} (priority {}, target {}): {}",
            handle.id(),
            handle.time(),
            handle.priority(),
            target,
            error
        );
        self.notifier.fire(SimulatorEvent::EventFailed {
            time: handle.time(),
            id: handle.id(),
            priority: handle.priority(),
            target,
            error: error.to_string(),
        });
    }

    fn report_drift(&self, time: T, lag_secs: f64) {
        tracing::warn!("Real-time pacing is {:.3}s behind the wall clock at {}", lag_secs, time);
        self.notifier.fire(SimulatorEvent::Drift { time, lag_secs });
    }
}

/// Cloneable handle to a simulator, passed to every action.
pub struct SimContext<T: SimTime> {
    shared: Arc<Shared<T>>,
}

impl<T: SimTime> Clone for SimContext<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: SimTime> SimContext<T> {
    pub fn now(&self) -> T {
        self.shared.current_time()
    }

    pub fn state(&self) -> RunState {
        sync::lock(&self.shared.core).state
    }

    pub fn replication(&self) -> Option<Replication<T>> {
        sync::lock(&self.shared.core).replication
    }

    /// Handle of the event whose action is running, if any.
    pub fn current_event(&self) -> Option<EventHandle<T>> {
        sync::lock(&self.shared.core).current_event
    }

    pub fn registry(&self) -> &InvocationRegistry<T> {
        &self.shared.registry
    }

    pub fn notifier(&self) -> &Notifier<T> {
        &self.shared.notifier
    }

    pub fn event_list_len(&self) -> usize {
        self.shared.events.len()
    }

    /// Snapshot of the pending events in execution order.
    pub fn pending_events(&self) -> Vec<EventHandle<T>> {
        self.shared.events.iter().collect()
    }

    /// Schedules `action` at absolute `time`.
    pub fn schedule_abs(&self, time: T, priority: Priority, action: Action<T>) -> Result<EventHandle<T>, SimulatorError> {
        if !time.is_valid() {
            return Err(SimulatorError::InvalidTime(time.to_string()));
        }
        self.schedule_with(|_| Ok(time), priority, action)
    }

    /// Schedules `action` `delay` after the current time.
    pub fn schedule_rel(&self, delay: T, priority: Priority, action: Action<T>) -> Result<EventHandle<T>, SimulatorError> {
        if !delay.is_valid() {
            return Err(SimulatorError::InvalidTime(delay.to_string()));
        }
        if delay.is_negative() {
            return Err(SimulatorError::NegativeDelay(delay.to_f64()));
        }
        self.schedule_with(|now| Ok(now.plus(delay)), priority, action)
    }

    pub fn schedule_now(&self, priority: Priority, action: Action<T>) -> Result<EventHandle<T>, SimulatorError> {
        self.schedule_with(Ok, priority, action)
    }

    fn schedule_with<F>(&self, resolve: F, priority: Priority, action: Action<T>) -> Result<EventHandle<T>, SimulatorError>
    where
        F: FnOnce(T) -> Result<T, SimulatorError>,
    {
        let core = sync::lock(&self.shared.core);
        if let Err(e) = core.check_scheduling() {
            tracing::debug!("Scheduling rejected: {}", e);
            return Err(e);
        }
        let time = resolve(core.current_time)?;
        if time.time_cmp(&core.current_time) == Ordering::Less {
            tracing::debug!("Rejected schedule at {} before current time {}", time, core.current_time);
            return Err(SimulatorError::PastSchedule {
                requested: time.to_f64(),
                current: core.current_time.to_f64(),
            });
        }
        let event = SimEvent::with_priority(time, priority, action)?;
        let handle = event.handle();
        self.shared.events.insert(event);
        drop(core);
        tracing::trace!("Scheduled {}", handle);
        Ok(handle)
    }

    /// Queues `action` for the replication start while the model is being
    /// constructed; afterwards it is the same as [`schedule_now`](Self::schedule_now)
    /// with normal priority.
    pub fn schedule_on_init(&self, action: Action<T>) -> Result<(), SimulatorError> {
        {
            let mut core = sync::lock(&self.shared.core);
            if core.constructing {
                core.init_callbacks.push(action);
                return Ok(());
            }
        }
        self.schedule_now(Priority::NORMAL, action).map(|_| ())
    }

    /// Removes a pending event. Returns `false` when it already ran or was
    /// cancelled before.
    pub fn cancel(&self, handle: &EventHandle<T>) -> bool {
        let removed = self.shared.events.remove(handle);
        if removed {
            tracing::trace!("Cancelled {}", handle);
        }
        removed
    }

    /// Asks the executor to pause after the current action.
    pub fn stop(&self) -> Result<(), SimulatorError> {
        let mut core = sync::lock(&self.shared.core);
        if !core.state.can_stop() {
            return Err(SimulatorError::IllegalState {
                operation: "stop",
                state: core.state,
            });
        }
        core.state = RunState::Stopping;
        self.shared.stop_requested.store(true, AtomicOrdering::SeqCst);
        tracing::debug!("Stop requested at {}", core.current_time);
        Ok(())
    }

    /// Changes the real-time speed factor; takes effect at the next pacing check.
    pub fn set_speed_factor(&self, speed_factor: f64) -> Result<(), SimulatorError> {
        strategy::check_speed_factor(speed_factor)?;
        self.shared.speed.request(speed_factor);
        Ok(())
    }
}

/// Configures and builds a [`Simulator`].
pub struct SimulatorBuilder<T: SimTime> {
    store: StoreKind,
    stepping: Stepping<T>,
    pacing: Pacing,
    error_policy: ErrorPolicy,
    time_source: Arc<dyn TimeInterface>,
    notification_capacity: usize,
}

impl<T: SimTime> SimulatorBuilder<T> {
    pub fn new() -> Self {
        Self {
            store: StoreKind::default(),
            stepping: Stepping::EventDriven,
            pacing: Pacing::AsFastAsPossible,
            error_policy: ErrorPolicy::default(),
            time_source: Arc::new(StdTimeSource),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }

    pub fn store(mut self, store: StoreKind) -> Self {
        self.store = store;
        self
    }

    pub fn stepping(mut self, stepping: Stepping<T>) -> Self {
        self.stepping = stepping;
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    pub fn time_source(mut self, time_source: Arc<dyn TimeInterface>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Simulator<T>, SimulatorError> {
        self.stepping.validate()?;
        self.pacing.validate()?;
        if self.notification_capacity == 0 {
            return Err(SimulatorError::InvalidConfiguration(
                "notification capacity must be greater than zero".to_string(),
            ));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> Simulator<T> {
        let shared = Shared {
            core: Mutex::new(Core::new()),
            events: EventList::new(self.store),
            registry: InvocationRegistry::new(),
            notifier: Notifier::new(self.notification_capacity),
            executor: Mutex::new(Executor {
                stepping: self.stepping,
                pacer: Pacer::new(self.pacing, self.time_source),
                next_step: None,
            }),
            stop_requested: AtomicBool::new(false),
            speed: SpeedControl::default(),
            error_policy: self.error_policy,
        };
        Simulator {
            ctx: SimContext {
                shared: Arc::new(shared),
            },
            worker: None,
        }
    }
}

impl<T: SimTime> Default for SimulatorBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Discrete-event simulator.
pub struct Simulator<T: SimTime> {
    ctx: SimContext<T>,
    worker: Option<JoinHandle<Result<usize, SimulatorError>>>,
}

impl<T: SimTime> Simulator<T> {
    /// Event-driven, as-fast-as-possible simulator with the default store.
    pub fn new() -> Self {
        SimulatorBuilder::new().assemble()
    }

    pub fn builder() -> SimulatorBuilder<T> {
        SimulatorBuilder::new()
    }

    /// Fixed-step (DESS) simulator.
    pub fn dess(dt: T) -> Result<Self, SimulatorError> {
        SimulatorBuilder::new().stepping(Stepping::FixedStep(dt)).build()
    }

    /// Event-driven simulator paced against the wall clock.
    pub fn real_time(config: RealTimeConfig) -> Result<Self, SimulatorError> {
        SimulatorBuilder::new().pacing(Pacing::RealTime(config)).build()
    }

    pub fn context(&self) -> SimContext<T> {
        self.ctx.clone()
    }

    /// Prepares a replication: resets the clock to its start, clears pending
    /// events and lets `model` build its initial work.
    pub fn initialize<M>(&mut self, model: &mut M, replication: Replication<T>) -> Result<(), SimulatorError>
    where
        M: Model<T> + ?Sized,
    {
        {
            let core = sync::lock(&self.ctx.shared.core);
            if !core.state.can_initialize() {
                return Err(SimulatorError::IllegalState {
                    operation: "initialize",
                    state: core.state,
                });
            }
        }
        self.join_worker();

        let shared = &self.ctx.shared;
        let start = replication.start();
        {
            let mut core = sync::lock(&shared.core);
            shared.events.clear();
            core.current_time = start;
            core.replication = Some(replication);
            core.replication_started = false;
            core.replication_ended = false;
            core.current_event = None;
            core.init_callbacks.clear();
            core.constructing = true;
        }
        {
            let mut executor = sync::lock(&shared.executor);
            executor.next_step = None;
            executor.pacer.reset();
        }

        let constructed = model.construct_model(&self.ctx);

        let mut core = sync::lock(&shared.core);
        core.constructing = false;
        let callbacks = std::mem::take(&mut core.init_callbacks);
        if let Err(e) = constructed {
            core.state = RunState::NotInitialized;
            core.replication = None;
            shared.events.clear();
            tracing::error!("Model construction failed: {}", e);
            return Err(SimulatorError::ModelConstruction(e.to_string()));
        }
        for action in callbacks {
            shared.events.insert(SimEvent::kernel(start, Priority::NORMAL, action));
        }
        if replication.has_warmup_period() {
            let warmup = replication.warmup();
            shared.events.insert(SimEvent::kernel(
                warmup,
                Priority::KERNEL_MAX,
                Action::direct(move |ctx: &SimContext<T>| {
                    tracing::info!("Warmup period over at {}", warmup);
                    ctx.notifier().fire(SimulatorEvent::Warmup { time: warmup });
                    Ok(())
                }),
            ));
        }
        core.state = RunState::Initialized;
        tracing::info!(
            "Replication {} initialized: start {}, warmup {}, end {}, {} events pending",
            replication.id(),
            start,
            replication.warmup(),
            replication.end(),
            shared.events.len()
        );
        Ok(())
    }

    /// Starts or resumes the executor on its own thread.
    pub fn start(&mut self) -> Result<(), SimulatorError> {
        let shared = Arc::clone(&self.ctx.shared);
        shared.begin_run("start")?;
        self.join_worker();
        let spawned = std::thread::Builder::new()
            .name("devsim-executor".to_string())
            .spawn(move || shared.drive(None, None));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                sync::lock(&self.ctx.shared.core).state = RunState::Stopped;
                Err(SimulatorError::Executor(e.to_string()))
            }
        }
    }

    pub fn stop(&self) -> Result<(), SimulatorError> {
        self.ctx.stop()
    }

    /// Blocks until the executor thread finishes and returns its fatal error,
    /// if any. Returns immediately when no thread is running.
    pub fn wait_until_stopped(&mut self) -> Result<(), SimulatorError> {
        match self.worker.take() {
            None => Ok(()),
            Some(handle) => match handle.join() {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(SimulatorError::Executor("executor thread panicked".to_string())),
            },
        }
    }

    /// Runs on the calling thread until no event remains at or before
    /// `min(time, end)`, then advances the clock to that bound. The first
    /// event beyond the bound stays pending; the simulator is left paused
    /// unless the bound reached the replication end.
    pub fn run_up_to(&mut self, time: T) -> Result<usize, SimulatorError> {
        if !time.is_valid() {
            return Err(SimulatorError::InvalidTime(time.to_string()));
        }
        self.ctx.shared.begin_run("run_up_to")?;
        self.join_worker();
        self.ctx.shared.drive(Some(time), None)
    }

    /// Runs the replication to its end on the calling thread.
    pub fn run_to_end(&mut self) -> Result<usize, SimulatorError> {
        self.ctx.shared.begin_run("run_to_end")?;
        self.join_worker();
        self.ctx.shared.drive(None, None)
    }

    /// Executes exactly one event. Returns `false` when none was due, in
    /// which case the replication has ended.
    pub fn step(&mut self) -> Result<bool, SimulatorError> {
        self.ctx.shared.begin_run("step")?;
        self.join_worker();
        self.ctx.shared.drive(None, Some(1)).map(|executed| executed == 1)
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if let Ok(Err(e)) = handle.join() {
                tracing::debug!("Discarding result of previous run: {}", e);
            }
        }
    }

    pub fn state(&self) -> RunState {
        self.ctx.state()
    }

    pub fn is_starting_or_running(&self) -> bool {
        self.state().is_starting_or_running()
    }

    pub fn replication_ended(&self) -> bool {
        sync::lock(&self.ctx.shared.core).replication_ended
    }

    pub fn current_time(&self) -> T {
        self.ctx.now()
    }

    pub fn replication(&self) -> Option<Replication<T>> {
        self.ctx.replication()
    }

    pub fn event_list_len(&self) -> usize {
        self.ctx.event_list_len()
    }

    pub fn store_kind(&self) -> StoreKind {
        self.ctx.shared.events.kind()
    }

    pub fn registry(&self) -> &InvocationRegistry<T> {
        self.ctx.registry()
    }

    pub fn schedule_abs(&self, time: T, priority: Priority, action: Action<T>) -> Result<EventHandle<T>, SimulatorError> {
        self.ctx.schedule_abs(time, priority, action)
    }

    pub fn schedule_rel(&self, delay: T, priority: Priority, action: Action<T>) -> Result<EventHandle<T>, SimulatorError> {
        self.ctx.schedule_rel(delay, priority, action)
    }

    pub fn schedule_now(&self, priority: Priority, action: Action<T>) -> Result<EventHandle<T>, SimulatorError> {
        self.ctx.schedule_now(priority, action)
    }

    pub fn cancel(&self, handle: &EventHandle<T>) -> bool {
        self.ctx.cancel(handle)
    }

    pub fn add_listener(&self, listener: impl SimulatorListener<T> + 'static) -> ListenerId {
        self.ctx.notifier().add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.ctx.notifier().remove_listener(id)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SimulatorEvent<T>> {
        self.ctx.notifier().subscribe()
    }

    pub fn notifications(&self) -> impl futures_core::Stream<Item = SimulatorEvent<T>> + Send + 'static {
        self.ctx.notifier().notifications()
    }

    pub fn set_speed_factor(&self, speed_factor: f64) -> Result<(), SimulatorError> {
        self.ctx.set_speed_factor(speed_factor)
    }
}

impl<T: SimTime> Default for Simulator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SimTime> Drop for Simulator<T> {
    fn drop(&mut self) {
        if self.is_starting_or_running() {
            let _ = self.ctx.stop();
        }
        self.join_worker();
        // Actions and handlers usually hold contexts; dropping them breaks the
        // reference cycle back to the shared state.
        self.ctx.shared.events.clear();
        self.ctx.shared.registry.clear();
        self.ctx.shared.notifier.clear_listeners();
    }
}
