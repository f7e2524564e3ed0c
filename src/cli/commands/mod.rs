//! CLI command implementations.

mod claim;
mod config;
mod simulate;
mod telemetry;

pub use claim::{run_claim, ClaimArgs};
pub use config::{load_config, run_config, ConfigArgs};
pub use simulate::{run_simulate, simulate, SimulateArgs, SimulationReport};
pub use telemetry::init_tracing;
