//! Load-and-measure run: start the load, sample telemetry once per tick while it
//! runs, then join the load before handing back the series.

use std::sync::Arc;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::RunError;
use crate::load::{worker_count, LoadGenerator, LoadHandle, LoadOutcome, StopFlag};
use crate::telemetry::{SystemTelemetry, TelemetrySource};
use crate::types::{LoadRequest, LoadSummary, Reading, RunReport, TelemetrySample};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub tick: Duration,
    pub execution_units: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            execution_units: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Done,
}

impl RunState {
    pub fn can_advance_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Idle, RunState::Running)
                | (RunState::Running, RunState::Draining)
                | (RunState::Draining, RunState::Done)
        )
    }
}

/// One orchestrator per run; `run` consumes it.
pub struct Orchestrator {
    source: Arc<dyn TelemetrySource>,
    settings: RunSettings,
    state: RunState,
}

impl Orchestrator {
    pub fn new(source: Arc<dyn TelemetrySource>, settings: RunSettings) -> Self {
        Self {
            source,
            settings,
            state: RunState::Idle,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "bad run transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }

    pub async fn run(self, request: LoadRequest) -> Result<RunReport, RunError> {
        self.run_until(request, StopFlag::new()).await
    }

    /// Like [`run`](Self::run), but ends early once `stop` is raised. The load is
    /// joined before this returns either way.
    pub async fn run_until(
        mut self,
        request: LoadRequest,
        stop: StopFlag,
    ) -> Result<RunReport, RunError> {
        let units = self.settings.execution_units;
        let workers = worker_count(units, request.utilization_percent());
        info!(
            utilization = request.utilization_percent(),
            duration_secs = request.duration_secs(),
            workers,
            execution_units = units,
            "starting run"
        );

        let started = Instant::now();
        let load = LoadGenerator::start(workers, request.duration(), stop.clone());
        // if this future is dropped mid-run, stop the workers instead of leaving them spinning
        let guard = AbandonGuard(Some(stop.clone()));
        self.advance(RunState::Running);

        let sampled = self.sample_loop(&request, started, &stop).await;
        if sampled.is_err() {
            load.stop();
        }

        self.advance(RunState::Draining);
        let joined = join_load(load).await;
        guard.disarm();
        self.advance(RunState::Done);

        let outcome = joined?;
        let samples = sampled?;
        let summary = LoadSummary {
            execution_units: units,
            workers_requested: outcome.requested,
            workers_started: outcome.started,
            workers_panicked: outcome.panicked,
            partial_start: outcome.partial_start(),
            cancelled: stop.is_raised(),
        };
        info!(
            samples = samples.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            cancelled = summary.cancelled,
            "run finished"
        );
        Ok(RunReport {
            load: summary,
            samples,
        })
    }

    async fn sample_loop(
        &self,
        request: &LoadRequest,
        started: Instant,
        stop: &StopFlag,
    ) -> Result<Vec<TelemetrySample>, RunError> {
        let duration = request.duration();
        // duration is unbounded here, so grow on demand
        let mut samples = Vec::new();
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.raised() => break,
            }
            if stop.is_raised() || started.elapsed() >= duration {
                break;
            }
            let source = Arc::clone(&self.source);
            let sample = tokio::task::spawn_blocking(move || collect_sample(&*source, started))
                .await
                .map_err(|e| RunError::Sampling(e.to_string()))?;
            samples.push(sample);
        }
        Ok(samples)
    }
}

/// Read every source once and assemble a sample. A failing source only marks its
/// own field as unavailable.
pub fn collect_sample(source: &dyn TelemetrySource, started: Instant) -> TelemetrySample {
    let cpu = field("cpu", source.read_cpu());
    let memory = field("memory", source.read_memory());
    let network = field("network", source.read_network());
    let power = field("power", source.read_power());
    TelemetrySample {
        timestamp: OffsetDateTime::now_utc(),
        offset_ms: started.elapsed().as_millis() as u64,
        cpu,
        memory,
        network,
        power,
    }
}

fn field<T, E: std::fmt::Display>(name: &str, r: Result<T, E>) -> Reading<T> {
    if let Err(e) = &r {
        warn!("{name} telemetry unavailable: {e}");
    }
    r.into()
}

async fn join_load(load: LoadHandle) -> Result<LoadOutcome, RunError> {
    debug!(
        started = load.started(),
        running = load.running(),
        "joining load workers"
    );
    tokio::task::spawn_blocking(move || load.join())
        .await
        .map_err(|e| RunError::Join(e.to_string()))
}

struct AbandonGuard(Option<StopFlag>);

impl AbandonGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.0.take() {
            warn!("run abandoned before completion, stopping load workers");
            stop.raise();
        }
    }
}

/// Run a measurement against the host with default settings and return the series.
pub async fn run_measurement(
    utilization_percent: i64,
    duration_secs: i64,
) -> Result<Vec<TelemetrySample>, RunError> {
    let request = LoadRequest::new(utilization_percent, duration_secs)?;
    let source: Arc<dyn TelemetrySource> = Arc::new(SystemTelemetry::default());
    let report = Orchestrator::new(source, RunSettings::default())
        .run(request)
        .await?;
    Ok(report.samples)
}
