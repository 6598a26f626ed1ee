// Concurrent producers against a single executor

use devsim_rs::*;
use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

const PRODUCERS: usize = 8;
const EVENTS_PER_PRODUCER: usize = 12_500;

fn empty_model(_: &SimContext<f64>) -> Result<(), Box<dyn Error + Send + Sync>> {
    Ok(())
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

/// Schedules `delay` ahead of the clock until `keep_going` says stop.
/// Returns how many accepted events fall at or before `end`.
fn produce_until<F>(ctx: SimContext<f64>, delay: f64, end: f64, executed: Arc<AtomicUsize>, keep_going: F) -> usize
where
    F: Fn(&SimContext<f64>) -> bool,
{
    let mut due = 0;
    while keep_going(&ctx) {
        let executed = Arc::clone(&executed);
        let handle = ctx
            .schedule_rel(
                delay,
                Priority::NORMAL,
                Action::direct(move |_| {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        if handle.time() <= end {
            due += 1;
        }
    }
    due
}

#[test]
fn test_concurrent_producers_lose_nothing() {
    for store in [StoreKind::Tree, StoreKind::Heap] {
        let mut sim: Simulator<f64> = Simulator::builder().store(store).build().unwrap();
        sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, 10.0).unwrap())
            .unwrap();

        // The executor parks inside a gate event at t = 1 until every producer
        // is done, so all producers race each other and the running loop.
        let (done_tx, done_rx) = mpsc::channel::<()>();
        sim.schedule_abs(
            1.0,
            Priority::NORMAL,
            Action::direct(move |_| {
                for _ in 0..PRODUCERS {
                    done_rx.recv()?;
                }
                Ok(())
            }),
        )
        .unwrap();
        sim.start().unwrap();

        let executed = Arc::new(Mutex::new(Vec::with_capacity(PRODUCERS * EVENTS_PER_PRODUCER)));
        let barrier = Arc::new(Barrier::new(PRODUCERS));
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|n| {
                let ctx = sim.context();
                let executed = Arc::clone(&executed);
                let barrier = Arc::clone(&barrier);
                let done = done_tx.clone();
                thread::spawn(move || {
                    let priority = Priority::new(n as i16 % 10 + 1).unwrap();
                    barrier.wait();
                    for _ in 0..EVENTS_PER_PRODUCER {
                        let executed = Arc::clone(&executed);
                        ctx.schedule_abs(
                            5.0,
                            priority,
                            Action::direct(move |ctx: &SimContext<f64>| {
                                let event = ctx.current_event().ok_or("no current event")?;
                                executed
                                    .lock()
                                    .unwrap()
                                    .push((event.priority().value(), event.id()));
                                Ok(())
                            }),
                        )
                        .unwrap();
                    }
                    done.send(()).unwrap();
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        sim.wait_until_stopped().unwrap();

        let executed = executed.lock().unwrap();
        assert_eq!(executed.len(), PRODUCERS * EVENTS_PER_PRODUCER, "store {store:?}");
        let ids: HashSet<EventId> = executed.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids.len(), executed.len(), "duplicate ids with store {store:?}");
        for pair in executed.windows(2) {
            let ((p0, id0), (p1, id1)) = (pair[0], pair[1]);
            assert!(p0 > p1 || (p0 == p1 && id0 < id1));
        }
        assert_eq!(sim.event_list_len(), 0);
    }
}

#[test]
fn test_producers_scheduling_while_loop_runs() {
    // Producers schedule relative to whatever the clock shows; causality must
    // hold no matter how they interleave with time advancement.
    let mut sim: Simulator<f64> = Simulator::new();
    sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, 1e9).unwrap())
        .unwrap();
    fn tick(ctx: &SimContext<f64>) -> ActionResult {
        ctx.schedule_rel(0.001, Priority::MIN, Action::direct(tick))?;
        Ok(())
    }
    sim.schedule_now(Priority::MIN, Action::direct(tick)).unwrap();

    let last_seen = Arc::new(Mutex::new(0.0f64));
    let violations = Arc::new(Mutex::new(0usize));
    sim.start().unwrap();

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let ctx = sim.context();
            let last_seen = Arc::clone(&last_seen);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let last_seen = Arc::clone(&last_seen);
                    let violations = Arc::clone(&violations);
                    ctx.schedule_rel(
                        0.0,
                        Priority::MAX,
                        Action::direct(move |ctx: &SimContext<f64>| {
                            let mut last = last_seen.lock().unwrap();
                            if ctx.now() < *last {
                                *violations.lock().unwrap() += 1;
                            }
                            *last = ctx.now();
                            Ok(())
                        }),
                    )
                    .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    sim.stop().unwrap();
    sim.wait_until_stopped().unwrap();
    assert_eq!(*violations.lock().unwrap(), 0);
}

#[test]
fn test_fixed_step_clock_never_overtakes_producers() {
    init_logging();
    const END: f64 = 20_000.0;
    for store in [StoreKind::Tree, StoreKind::Heap] {
        let mut sim: Simulator<f64> = Simulator::builder()
            .store(store)
            .stepping(Stepping::FixedStep(1.0))
            .build()
            .unwrap();
        sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, END).unwrap())
            .unwrap();
        let executed = Arc::new(AtomicUsize::new(0));
        sim.start().unwrap();

        let ctx = sim.context();
        let counter = Arc::clone(&executed);
        let producer = thread::spawn(move || {
            produce_until(ctx, 0.5, END, counter, |ctx| ctx.state() != RunState::Stopped)
        });
        let result = sim.wait_until_stopped();
        let due = producer.join().unwrap();

        assert!(result.is_ok(), "store {store:?}: {result:?}");
        assert!(sim.replication_ended());
        assert_eq!(sim.current_time(), END);
        assert_eq!(executed.load(Ordering::SeqCst), due, "store {store:?}");
    }
}

#[test]
fn test_run_up_to_bounds_with_live_producer() {
    init_logging();
    const END: f64 = 500.0;
    for store in [StoreKind::Tree, StoreKind::Heap] {
        let mut sim: Simulator<f64> = Simulator::builder().store(store).build().unwrap();
        sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, END).unwrap())
            .unwrap();
        let executed = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let ctx = sim.context();
        let counter = Arc::clone(&executed);
        let flag = Arc::clone(&finished);
        let producer = thread::spawn(move || {
            produce_until(ctx, 0.25, END, counter, |_| !flag.load(Ordering::SeqCst))
        });
        for bound in 1..=END as u32 {
            sim.run_up_to(bound as f64).unwrap();
            assert_eq!(sim.current_time(), bound as f64);
        }
        finished.store(true, Ordering::SeqCst);
        let due = producer.join().unwrap();

        assert!(sim.replication_ended());
        assert_eq!(executed.load(Ordering::SeqCst), due, "store {store:?}");
    }
}

#[test]
fn test_every_accepted_event_before_end_runs() {
    init_logging();
    const END: f64 = 5.0;
    for store in [StoreKind::Tree, StoreKind::Heap] {
        let mut sim: Simulator<f64> = Simulator::builder().store(store).build().unwrap();
        sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, END).unwrap())
            .unwrap();
        let executed = Arc::new(AtomicUsize::new(0));
        sim.start().unwrap();

        // Producers keep adding work just ahead of the clock, so the executor
        // keeps finding a nearly empty list while it tries to close the
        // replication.
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let ctx = sim.context();
                let counter = Arc::clone(&executed);
                thread::spawn(move || {
                    produce_until(ctx, 0.01, END, counter, |ctx| ctx.state() != RunState::Stopped)
                })
            })
            .collect();
        let result = sim.wait_until_stopped();
        let due: usize = producers.into_iter().map(|p| p.join().unwrap()).sum();

        assert!(result.is_ok(), "store {store:?}: {result:?}");
        assert_eq!(sim.current_time(), END);
        assert_eq!(executed.load(Ordering::SeqCst), due, "store {store:?}");
    }
}
