// Simulation engine: arena geometry, unit model, combat and the multi-rate scheduler.

pub mod battlefield;
pub mod combat;
pub mod config;
pub mod physics;
pub mod scenario;
pub mod scheduler;
pub mod snapshot;
pub mod spatial;
pub mod unit;

pub use battlefield::Battlefield;
pub use scenario::ScenarioConfig;
pub use scheduler::{SchedulerConfig, SimulationScheduler};
