// Benchmark for the two event list stores and the executor loop
// Run with: cargo bench

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use devsim_rs::*;
use std::error::Error;

const EVENTS: usize = 10_000;

fn noop() -> Action<f64> {
    Action::direct(|_| Ok(()))
}

fn filled(kind: StoreKind) -> (EventList<f64>, Vec<EventHandle<f64>>) {
    let list = EventList::new(kind);
    let mut handles = Vec::with_capacity(EVENTS);
    for i in 0..EVENTS {
        let event = SimEvent::new(((i * 7919) % EVENTS) as f64, (i % 10 + 1) as i16, noop()).unwrap();
        handles.push(event.handle());
        list.insert(event);
    }
    (list, handles)
}

fn bench_insert_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert then drain 10k");
    for kind in [StoreKind::Tree, StoreKind::Heap] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{kind:?}")), &kind, |b, kind| {
            b.iter(|| {
                let (list, _) = filled(*kind);
                let mut drained = 0;
                while list.pop_first().is_some() {
                    drained += 1;
                }
                assert_eq!(drained, EVENTS);
            });
        });
    }
    group.finish();
}

fn bench_cancel_every_tenth(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancel 1k of 10k");
    for kind in [StoreKind::Tree, StoreKind::Heap] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{kind:?}")), &kind, |b, kind| {
            b.iter_batched(
                || filled(*kind),
                |(list, handles)| {
                    let removed = handles.iter().step_by(10).filter(|h| list.remove(h)).count();
                    assert_eq!(removed, EVENTS / 10);
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_executor_loop(c: &mut Criterion) {
    c.bench_function("run 10k self-scheduling events", |b| {
        b.iter(|| {
            let mut sim: Simulator<f64> = Simulator::new();
            let mut model = |ctx: &SimContext<f64>| -> Result<(), Box<dyn Error + Send + Sync>> {
                fn tick(ctx: &SimContext<f64>) -> ActionResult {
                    ctx.schedule_rel(1.0, Priority::NORMAL, Action::direct(tick))?;
                    Ok(())
                }
                ctx.schedule_on_init(Action::direct(tick))?;
                Ok(())
            };
            sim.initialize(&mut model, Replication::new(0.0, 0.0, (EVENTS - 1) as f64).unwrap())
                .unwrap();
            let executed = sim.run_to_end().unwrap();
            assert_eq!(executed, EVENTS);
        });
    });
}

criterion_group!(benches, bench_insert_and_drain, bench_cancel_every_tenth, bench_executor_loop);
criterion_main!(benches);
