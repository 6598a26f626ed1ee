// Real-time pacing against the wall clock

use devsim_rs::*;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn empty_model(_: &SimContext<f64>) -> Result<(), Box<dyn Error + Send + Sync>> {
    Ok(())
}

fn schedule_spaced(sim: &Simulator<f64>, count: usize, counter: &Arc<AtomicUsize>) {
    for i in 1..=count {
        let counter = Arc::clone(counter);
        sim.schedule_abs(
            i as f64,
            Priority::NORMAL,
            Action::direct(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    }
}

#[test]
fn test_thousandfold_speed_finishes_quickly() {
    let mut sim = Simulator::real_time(RealTimeConfig {
        speed_factor: 1000.0,
        poll_interval: Duration::from_millis(2),
        ..RealTimeConfig::default()
    })
    .unwrap();
    sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, 100.0).unwrap())
        .unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    schedule_spaced(&sim, 100, &counter);

    let started = Instant::now();
    sim.start().unwrap();
    sim.wait_until_stopped().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(counter.load(Ordering::SeqCst), 100);
    // 100 units at 1000x is 100ms of pacing.
    assert!(elapsed >= Duration::from_millis(90), "finished too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
}

#[test]
fn test_manual_clock_accounts_for_paced_time() {
    let clock = Arc::new(ManualTimeSource::new());
    let mut sim = Simulator::builder()
        .pacing(Pacing::RealTime(RealTimeConfig {
            speed_factor: 2.0,
            sim_unit_secs: 0.5,
            ..RealTimeConfig::default()
        }))
        .time_source(clock.clone())
        .build()
        .unwrap();
    sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, 40.0).unwrap())
        .unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    schedule_spaced(&sim, 40, &counter);

    sim.run_to_end().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 40);
    // 40 units * 0.5s / 2.0
    assert_eq!(clock.elapsed(), Duration::from_secs(10));
    assert!(clock.sleeps().iter().all(|d| *d <= Duration::from_millis(10)));
}

#[test]
fn test_stop_interrupts_a_long_wait() {
    let mut sim = Simulator::real_time(RealTimeConfig::default()).unwrap();
    sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, 3600.0).unwrap())
        .unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    sim.schedule_abs(
        1800.0,
        Priority::NORMAL,
        Action::direct(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    )
    .unwrap();

    sim.start().unwrap();
    std::thread::sleep(Duration::from_millis(30));
    let stop_requested = Instant::now();
    sim.stop().unwrap();
    sim.wait_until_stopped().unwrap();

    assert!(stop_requested.elapsed() < Duration::from_secs(1));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(sim.current_time(), 0.0);
    assert_eq!(sim.event_list_len(), 1);
}

#[test]
fn test_speed_change_while_running() {
    let mut sim = Simulator::real_time(RealTimeConfig {
        speed_factor: 1.0,
        poll_interval: Duration::from_millis(5),
        ..RealTimeConfig::default()
    })
    .unwrap();
    sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, 50.0).unwrap())
        .unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    schedule_spaced(&sim, 50, &counter);

    let started = Instant::now();
    sim.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    sim.set_speed_factor(10_000.0).unwrap();
    sim.wait_until_stopped().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 50);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(sim.set_speed_factor(0.0).is_err());
}

#[test]
fn test_drift_is_reported() {
    let mut sim = Simulator::real_time(RealTimeConfig {
        speed_factor: 1000.0,
        drift_tolerance: Duration::from_millis(5),
        ..RealTimeConfig::default()
    })
    .unwrap();
    sim.initialize(&mut empty_model, Replication::new(0.0, 0.0, 10.0).unwrap())
        .unwrap();
    let drifts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&drifts);
    sim.add_listener(move |e: &SimulatorEvent<f64>| {
        if let SimulatorEvent::Drift { lag_secs, .. } = e {
            sink.lock().unwrap().push(*lag_secs);
        }
    });
    // The first action overruns its slot by far more than the tolerance.
    sim.schedule_abs(
        1.0,
        Priority::NORMAL,
        Action::direct(|_| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        }),
    )
    .unwrap();
    sim.schedule_abs(2.0, Priority::NORMAL, Action::direct(|_| Ok(()))).unwrap();
    sim.run_to_end().unwrap();

    let drifts = drifts.lock().unwrap();
    assert_eq!(drifts.len(), 1);
    assert!(drifts[0] > 0.005);
}
