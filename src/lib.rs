// devsim-rs: discrete-event simulation kernel

pub mod calendar;
pub mod config;
pub mod error;
pub mod event;
pub mod resource;
pub mod simulator;
pub mod state_saver;
pub mod time;
pub mod time_source;

mod sync;

// --- Re-exports ---

pub use calendar::{CalendarClock, CalendarUnit};
pub use config::{ConfigError, SimulatorConfig, load_config};
pub use error::{ExecutionError, ResourceError, SimEventError, SimulatorError};
pub use event::list::{EventList, EventStore, HeapStore, StoreKind, TreeStore};
pub use event::registry::InvocationRegistry;
pub use event::{Action, ActionResult, EventHandle, EventId, NamedInvocation, Priority, SimEvent, CONSTRUCTOR};
pub use resource::{RequestId, RequestOutcome, Resource, ResourceEvent, ResourceListener, ResourceRequestor, Requestor};
pub use simulator::{
    ErrorPolicy, ListenerId, Model, Pacing, RealTimeConfig, Replication, RunState, SimContext, Simulator,
    SimulatorBuilder, SimulatorEvent, SimulatorListener, Stepping,
};
pub use state_saver::{StateSaverError, restore_state, save_state};
pub use time::{SimDuration, SimTime};
pub use time_source::{ManualTimeSource, StdTimeSource, TimeInterface};
