//! Per-context runtime: the event loop that ties the engine, leadership and
//! replication together for one open context.

mod context;
mod driver;
mod hub;
pub mod simulation;

pub use context::{Inbound, TimerContext};
pub use driver::{run_context, Command};
pub use hub::SessionHub;
pub use simulation::{LeaderExit, SimulationHarness, SimulationResult, SimulationScenario, SimulationSeed};
