//! Built-in queueing scenarios: customers arrive at random, seize a server of
//! a shared [`Resource`], hold it for a random service time and leave.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use devsim_rs::{
    Action, ActionResult, Model, Priority, Requestor, Resource, ResourceEvent, SimContext,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::trace::TraceRecord;

/// Built-in scenario names with a one-line description.
pub const SCENARIOS: &[(&str, &str)] = &[
    ("mm1", "single server, exponential arrivals and service, load 0.8"),
    ("mm2", "two servers sharing one queue, load 0.9 per server"),
    ("priority", "single server, a fifth of the customers are urgent and jump the queue"),
];

const URGENT: Priority = Priority::MAX;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub name: String,
    /// Mean arrivals per time unit.
    pub arrival_rate: f64,
    /// Mean services per time unit and server.
    pub service_rate: f64,
    pub servers: u32,
    /// Share of customers requesting with urgent priority.
    pub urgent_fraction: f64,
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: "mm1".to_string(),
            arrival_rate: 0.8,
            service_rate: 1.0,
            servers: 1,
            urgent_fraction: 0.0,
            seed: 1,
        }
    }
}

impl ScenarioConfig {
    pub fn preset(name: &str) -> Option<Self> {
        let base = Self::default();
        match name {
            "mm1" => Some(base),
            "mm2" => Some(Self {
                name: name.to_string(),
                arrival_rate: 1.8,
                servers: 2,
                ..base
            }),
            "priority" => Some(Self {
                name: name.to_string(),
                urgent_fraction: 0.2,
                ..base
            }),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.arrival_rate.is_finite() && self.arrival_rate > 0.0) {
            return Err(format!("arrival_rate {} must be positive", self.arrival_rate));
        }
        if !(self.service_rate.is_finite() && self.service_rate > 0.0) {
            return Err(format!("service_rate {} must be positive", self.service_rate));
        }
        if self.servers == 0 {
            return Err("at least one server is required".to_string());
        }
        if !(0.0..=1.0).contains(&self.urgent_fraction) {
            return Err(format!("urgent_fraction {} must be within [0, 1]", self.urgent_fraction));
        }
        Ok(())
    }
}

/// Statistics of one replication; waits are counted from the warmup time on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub arrivals: u64,
    pub served: u64,
    pub total_wait: f64,
    pub max_wait: f64,
    pub max_queue: usize,
    #[serde(skip)]
    busy_area: f64,
    #[serde(skip)]
    last_change: f64,
    #[serde(skip)]
    last_claimed: f64,
}

impl QueueStats {
    pub fn mean_wait(&self) -> f64 {
        if self.served == 0 {
            0.0
        } else {
            self.total_wait / self.served as f64
        }
    }

    /// Mean number of busy servers over `[start, until]`.
    pub fn utilisation(&self, start: f64, until: f64) -> f64 {
        let span = until - start;
        if span <= 0.0 {
            return 0.0;
        }
        (self.busy_area + self.last_claimed * (until - self.last_change)) / span
    }

    fn claimed_changed(&mut self, time: f64, claimed: f64) {
        self.busy_area += self.last_claimed * (time - self.last_change);
        self.last_change = time;
        self.last_claimed = claimed;
    }
}

/// A queueing station built fresh for every replication.
struct Station {
    config: ScenarioConfig,
    resource: Resource<f64>,
    rng: Mutex<StdRng>,
    stats: Arc<Mutex<QueueStats>>,
    trace: Option<Sender<TraceRecord>>,
    label: String,
    next_customer: AtomicU64,
}

impl Station {
    fn exponential(&self, rate: f64) -> f64 {
        let u: f64 = self.rng.lock().unwrap_or_else(|e| e.into_inner()).random();
        -(1.0 - u).ln() / rate
    }

    fn urgent(&self) -> bool {
        self.config.urgent_fraction > 0.0
            && self
                .rng
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .random_bool(self.config.urgent_fraction)
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, QueueStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, ctx: &SimContext<f64>, kind: &str, detail: String) {
        if let Some(trace) = &self.trace {
            let _ = trace.send(TraceRecord {
                replication: self.label.clone(),
                time: ctx.now(),
                kind: kind.to_string(),
                detail,
            });
        }
    }

    fn arrive(self: &Arc<Self>, ctx: &SimContext<f64>) -> ActionResult {
        let customer = self.next_customer.fetch_add(1, Ordering::Relaxed);
        let arrived = ctx.now();
        let priority = if self.urgent() { URGENT } else { Priority::NORMAL };
        if past_warmup(ctx) {
            self.stats().arrivals += 1;
        }
        self.record(ctx, "arrival", format!("customer {customer} at priority {priority}"));

        let station = Arc::clone(self);
        let on_grant: Requestor<f64> = Arc::new(move |ctx: &SimContext<f64>, _: &str, amount: f64| {
            station.begin_service(ctx, customer, arrived, amount)
        });
        self.resource.request_capacity(1.0, on_grant, priority)?;

        let station = Arc::clone(self);
        ctx.schedule_rel(
            self.exponential(self.config.arrival_rate),
            Priority::NORMAL,
            Action::direct(move |ctx: &SimContext<f64>| station.arrive(ctx)),
        )?;
        Ok(())
    }

    fn begin_service(self: &Arc<Self>, ctx: &SimContext<f64>, customer: u64, arrived: f64, amount: f64) -> ActionResult {
        let wait = ctx.now() - arrived;
        if past_warmup(ctx) {
            let mut stats = self.stats();
            stats.total_wait += wait;
            stats.max_wait = stats.max_wait.max(wait);
        }
        self.record(ctx, "service", format!("customer {customer} waited {wait:.4}"));

        let station = Arc::clone(self);
        ctx.schedule_rel(
            self.exponential(self.config.service_rate),
            Priority::NORMAL,
            Action::direct(move |ctx: &SimContext<f64>| {
                station.resource.release_capacity(amount)?;
                if past_warmup(ctx) {
                    station.stats().served += 1;
                }
                station.record(ctx, "departure", format!("customer {customer}"));
                Ok(())
            }),
        )?;
        Ok(())
    }
}

fn past_warmup(ctx: &SimContext<f64>) -> bool {
    ctx.replication().is_some_and(|r| ctx.now() >= r.warmup())
}

/// [`Model`] that builds a [`Station`] for every replication.
pub struct QueueModel {
    config: ScenarioConfig,
    stats: Arc<Mutex<QueueStats>>,
    trace: Option<Sender<TraceRecord>>,
}

impl QueueModel {
    pub fn new(config: ScenarioConfig, trace: Option<Sender<TraceRecord>>) -> Self {
        Self {
            config,
            stats: Arc::new(Mutex::new(QueueStats::default())),
            trace,
        }
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.config.seed = seed;
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Model<f64> for QueueModel {
    fn construct_model(&mut self, ctx: &SimContext<f64>) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.config.validate()?;
        let replication = ctx.replication().ok_or("no replication")?;
        *self.stats.lock().unwrap_or_else(|e| e.into_inner()) = QueueStats {
            last_change: replication.start(),
            ..QueueStats::default()
        };

        let resource = Resource::new(ctx, self.config.name.clone(), f64::from(self.config.servers))?;
        let stats = Arc::clone(&self.stats);
        resource.add_listener(move |_: &str, event: &ResourceEvent<f64>| {
            let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
            match *event {
                ResourceEvent::UtilizationChanged { time, claimed, .. } => stats.claimed_changed(time, claimed),
                ResourceEvent::QueueLengthChanged { length, .. } => stats.max_queue = stats.max_queue.max(length),
            }
        });

        let station = Arc::new(Station {
            config: self.config.clone(),
            resource,
            rng: Mutex::new(StdRng::seed_from_u64(self.config.seed)),
            stats: Arc::clone(&self.stats),
            trace: self.trace.clone(),
            label: replication.id().to_string(),
            next_customer: AtomicU64::new(0),
        });
        tracing::debug!(
            "Station {} built: {} servers, seed {}",
            self.config.name,
            self.config.servers,
            self.config.seed
        );
        ctx.schedule_on_init(Action::direct(move |ctx: &SimContext<f64>| station.arrive(ctx)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devsim_rs::{Replication, Simulator};

    fn run(config: ScenarioConfig, end: f64) -> (QueueStats, f64) {
        let mut sim: Simulator<f64> = Simulator::new();
        let mut model = QueueModel::new(config, None);
        sim.initialize(&mut model, Replication::new(0.0, 0.0, end).unwrap())
            .unwrap();
        sim.run_to_end().unwrap();
        let stats = model.stats();
        let utilisation = stats.utilisation(0.0, sim.current_time());
        (stats, utilisation)
    }

    #[test]
    fn test_presets() {
        for (name, _) in SCENARIOS {
            let preset = ScenarioConfig::preset(name).unwrap();
            assert!(preset.validate().is_ok(), "{name}");
        }
        assert!(ScenarioConfig::preset("nope").is_none());
        let bad = ScenarioConfig {
            servers: 0,
            ..ScenarioConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_same_seed_same_result() {
        let (a, _) = run(ScenarioConfig::default(), 500.0);
        let (b, _) = run(ScenarioConfig::default(), 500.0);
        assert_eq!(a, b);
        assert!(a.arrivals > 0);
        assert!(a.served <= a.arrivals);
    }

    #[test]
    fn test_utilisation_is_bounded_by_servers() {
        let config = ScenarioConfig::preset("mm2").unwrap();
        let (stats, utilisation) = run(config, 2_000.0);
        assert!(stats.served > 0);
        assert!(utilisation > 0.0 && utilisation <= 2.0, "utilisation {utilisation}");
        assert!(stats.mean_wait() >= 0.0);
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let mut sim: Simulator<f64> = Simulator::new();
        let mut model = QueueModel::new(
            ScenarioConfig {
                arrival_rate: -1.0,
                ..ScenarioConfig::default()
            },
            None,
        );
        assert!(sim
            .initialize(&mut model, Replication::new(0.0, 0.0, 10.0).unwrap())
            .is_err());
    }
}
