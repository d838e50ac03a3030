//! Shared agent state: configuration, run admission and the telemetry source factory.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::AgentConfig;
use crate::orchestrator::RunSettings;
use crate::telemetry::{SystemTelemetry, TelemetrySource};

/// Builds a fresh telemetry source for each run so runs never share sampler state.
pub type SourceFactory = Arc<dyn Fn() -> Arc<dyn TelemetrySource> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub settings: RunSettings,
    // one permit per run allowed at once
    pub runs: Arc<Semaphore>,
    pub source_factory: SourceFactory,
}

impl AppState {
    pub fn new(config: AgentConfig) -> Self {
        let cpu_window = config.cpu_window;
        let power = config.power;
        let factory: SourceFactory = Arc::new(move || {
            Arc::new(SystemTelemetry::new(cpu_window, power)) as Arc<dyn TelemetrySource>
        });
        Self::with_source(config, RunSettings::default(), factory)
    }

    pub fn with_source(
        config: AgentConfig,
        settings: RunSettings,
        source_factory: SourceFactory,
    ) -> Self {
        Self {
            runs: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
            config: Arc::new(config),
            settings,
            source_factory,
        }
    }
}
