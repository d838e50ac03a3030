//! loadmeter_agent: run a synthetic CPU load on this host and sample system
//! telemetry once per second while it runs.

pub mod config;
pub mod error;
pub mod load;
pub mod orchestrator;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod types;

pub use error::{RequestError, RunError, TelemetryError};
pub use orchestrator::{run_measurement, Orchestrator, RunSettings};
pub use types::{LoadRequest, RunReport, TelemetrySample};
