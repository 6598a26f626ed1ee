// Async observers of simulator notifications

use devsim_rs::*;
use futures_util::StreamExt;
use std::error::Error;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::{assert_pending, assert_ready_eq, task};

fn empty_model(_: &SimContext<f64>) -> Result<(), Box<dyn Error + Send + Sync>> {
    Ok(())
}

fn initialized(sim: &mut Simulator<f64>, warmup: f64, end: f64) {
    sim.initialize(&mut empty_model, Replication::new(0.0, warmup, end).unwrap())
        .unwrap();
}

#[tokio::test]
async fn test_stream_sees_whole_replication_then_ends() {
    let mut sim: Simulator<f64> = Simulator::new();
    initialized(&mut sim, 2.0, 5.0);
    for t in [1.0, 3.0, 3.0, 4.0] {
        sim.schedule_abs(t, Priority::NORMAL, Action::direct(|_| Ok(()))).unwrap();
    }
    let stream = sim.notifications();
    sim.run_to_end().unwrap();
    // The stream closes once the last handle to the simulator is gone.
    drop(sim);

    let events: Vec<SimulatorEvent<f64>> = timeout(Duration::from_secs(5), stream.collect())
        .await
        .expect("stream did not close");
    let kinds: Vec<&str> = events.iter().map(SimulatorEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "SimulatorStarted",
            "StartReplication",
            "TimeChanged",
            "TimeChanged",
            "Warmup",
            "TimeChanged",
            "TimeChanged",
            "TimeChanged",
            "EndReplication",
            "SimulatorStopped",
        ]
    );
    let times: Vec<f64> = events.iter().map(SimulatorEvent::time).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]), "times went backwards: {times:?}");
}

#[tokio::test]
async fn test_receiver_waits_for_threaded_run() {
    let mut sim: Simulator<f64> = Simulator::new();
    initialized(&mut sim, 0.0, 100.0);
    for t in 1..=50 {
        sim.schedule_abs(t as f64, Priority::NORMAL, Action::direct(|_| Ok(()))).unwrap();
    }
    let mut rx = sim.subscribe();
    sim.start().unwrap();

    let ended_at = timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(SimulatorEvent::EndReplication { time }) => break time,
                Ok(_) => {}
                Err(e) => panic!("receiver failed: {e}"),
            }
        }
    })
    .await
    .expect("replication never ended");
    assert_eq!(ended_at, 100.0);

    tokio::task::spawn_blocking(move || sim.wait_until_stopped())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_lagging_stream_skips_instead_of_failing() {
    let mut sim: Simulator<f64> = Simulator::builder().notification_capacity(4).build().unwrap();
    initialized(&mut sim, 0.0, 500.0);
    for t in 1..=200 {
        sim.schedule_abs(t as f64, Priority::NORMAL, Action::direct(|_| Ok(()))).unwrap();
    }
    let stream = sim.notifications();
    sim.run_to_end().unwrap();
    drop(sim);

    let events: Vec<SimulatorEvent<f64>> = timeout(Duration::from_secs(5), stream.collect())
        .await
        .expect("stream did not close");
    assert_eq!(events.len(), 4);
    assert_eq!(events.last(), Some(&SimulatorEvent::SimulatorStopped { time: 500.0 }));
}

#[test]
fn test_stream_is_pending_until_something_fires() {
    let sim: Simulator<f64> = Simulator::new();
    let mut stream = task::spawn(sim.notifications());
    assert_pending!(stream.poll_next());

    sim.context()
        .notifier()
        .fire(SimulatorEvent::Warmup { time: 0.0 });
    assert!(stream.is_woken());
    assert_ready_eq!(stream.poll_next(), Some(SimulatorEvent::Warmup { time: 0.0 }));
    assert_pending!(stream.poll_next());
}

#[test]
fn test_listener_and_stream_agree() {
    let mut sim: Simulator<f64> = Simulator::new();
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    sim.add_listener(move |e: &SimulatorEvent<f64>| sink.lock().unwrap().push(e.clone()));
    initialized(&mut sim, 0.0, 3.0);
    sim.schedule_abs(2.0, Priority::NORMAL, Action::direct(|_| Ok(()))).unwrap();
    let stream = sim.notifications();
    sim.run_to_end().unwrap();
    drop(sim);

    let streamed: Vec<SimulatorEvent<f64>> = tokio_test::block_on(stream.collect());
    assert_eq!(*seen.lock().unwrap(), streamed);
}
