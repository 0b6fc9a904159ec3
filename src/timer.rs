use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::HealthcheckConfig;
use crate::probe::DynProbeRunner;
use crate::report::StatusReporter;
use crate::status::HealthStatus;
use crate::telemetry;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("healthcheck timer for container {container_id} is already running")]
    AlreadyActive { container_id: String },
    #[error("healthcheck for container {container_id} is disabled or has no test command")]
    NotEnabled { container_id: String },
}

/// Tick state shared between a timer and its worker task.
#[derive(Debug, Clone)]
struct TimerState {
    status: HealthStatus,
    consecutive_failures: u32,
    start_period_remaining_secs: u64,
    last_check_time: Option<DateTime<Utc>>,
}

/// Best-effort administrative view of one timer.
#[derive(Debug, Clone)]
pub struct TimerSnapshot {
    pub container_id: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub start_period_remaining_secs: u64,
    pub last_check_time: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Periodic healthcheck timer for one container.
///
/// The worker task holds `Arc` clones of the shared tick state rather than
/// the timer itself; the owner guarantees the state outlives the worker by
/// signalling stop and joining before dropping the timer.
pub struct HealthTimer {
    container_id: String,
    config: HealthcheckConfig,
    state: Arc<RwLock<TimerState>>,
    active: Arc<AtomicBool>,
    runner: DynProbeRunner,
    reporter: StatusReporter,
    shutdown: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

impl HealthTimer {
    pub fn new(
        container_id: impl Into<String>,
        config: HealthcheckConfig,
        runner: DynProbeRunner,
        reporter: StatusReporter,
    ) -> Self {
        let start_period_remaining_secs = config.start_period_secs;
        Self {
            container_id: container_id.into(),
            config,
            state: Arc::new(RwLock::new(TimerState {
                status: HealthStatus::None,
                consecutive_failures: 0,
                start_period_remaining_secs,
                last_check_time: None,
            })),
            active: Arc::new(AtomicBool::new(false)),
            runner,
            reporter,
            shutdown: None,
            worker: None,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn config(&self) -> &HealthcheckConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> HealthStatus {
        self.state.read().await.status
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        let state = self.state.read().await;
        TimerSnapshot {
            container_id: self.container_id.clone(),
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            start_period_remaining_secs: state.start_period_remaining_secs,
            last_check_time: state.last_check_time,
            active: self.is_active(),
        }
    }

    /// Spawns the worker and begins ticking every `interval_secs`.
    ///
    /// No status update is emitted here; the first `starting` emission comes
    /// from the first tick that is still inside the grace window, and with no
    /// grace window the first emission reflects the first probe outcome.
    pub async fn start(&mut self) -> Result<(), TimerError> {
        if self.is_active() {
            return Err(TimerError::AlreadyActive {
                container_id: self.container_id.clone(),
            });
        }
        if !self.config.enabled || self.config.test.is_empty() {
            return Err(TimerError::NotEnabled {
                container_id: self.container_id.clone(),
            });
        }

        {
            let mut state = self.state.write().await;
            state.status = HealthStatus::Starting;
            state.consecutive_failures = 0;
            state.start_period_remaining_secs = self.config.start_period_secs;
            state.last_check_time = Some(Utc::now());
        }

        self.active.store(true, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        let worker = Worker {
            container_id: self.container_id.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            active: self.active.clone(),
            runner: self.runner.clone(),
            reporter: self.reporter.clone(),
            starting_announced: false,
        };
        self.worker = Some(tokio::spawn(worker.run(shutdown_rx)));

        info!(
            container_id = %self.container_id,
            interval_secs = self.config.interval_secs,
            start_period_secs = self.config.start_period_secs,
            retries = self.config.retries,
            "healthcheck timer started"
        );
        Ok(())
    }

    /// Stops ticking and joins the worker. Idempotent.
    ///
    /// An in-flight probe is not interrupted; the worker exits at its next
    /// observation point, which the select on the shutdown channel keeps
    /// within the sleep granularity.
    pub async fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                if err.is_panic() {
                    error!(
                        container_id = %self.container_id,
                        ?err,
                        "healthcheck worker panicked"
                    );
                }
            }
            debug!(container_id = %self.container_id, "healthcheck timer stopped");
        }

        self.state.write().await.status = HealthStatus::None;
    }
}

struct Worker {
    container_id: String,
    config: HealthcheckConfig,
    state: Arc<RwLock<TimerState>>,
    active: Arc<AtomicBool>,
    runner: DynProbeRunner,
    reporter: StatusReporter,
    starting_announced: bool,
}

impl Worker {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        // A probe overrunning the interval delays later ticks instead of
        // bunching them.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if !self.active.load(Ordering::SeqCst) {
                        break;
                    }
                    self.tick().await;
                }
            }
        }

        debug!(container_id = %self.container_id, "healthcheck worker exited");
    }

    async fn tick(&mut self) {
        // Grace-period bookkeeping. Ticks fully inside the window skip the
        // probe; the tick on which the window empties proceeds to probe but
        // keeps its failure out of the retry threshold below.
        let mut grace_ended_this_tick = false;
        {
            let mut state = self.state.write().await;
            if state.start_period_remaining_secs > 0 {
                state.start_period_remaining_secs = state
                    .start_period_remaining_secs
                    .saturating_sub(self.config.interval_secs);

                if state.start_period_remaining_secs > 0 {
                    state.status = HealthStatus::Starting;
                    drop(state);
                    if !self.starting_announced {
                        self.starting_announced = true;
                        self.reporter
                            .send(&self.container_id, HealthStatus::Starting, 0)
                            .await;
                    }
                    return;
                }
                grace_ended_this_tick = true;
            }
        }

        let outcome = self
            .runner
            .execute(&self.config, &self.container_id)
            .await;
        let checked_at = Utc::now();

        telemetry::record_probe_result(if !outcome.ok {
            "error"
        } else if outcome.exit_code == 0 {
            "success"
        } else {
            "failure"
        });

        if !self.active.load(Ordering::SeqCst) {
            // Stopped while the probe was in flight; the result no longer
            // belongs to anyone.
            return;
        }

        let emit = {
            let mut state = self.state.write().await;
            state.last_check_time = Some(checked_at);

            if !outcome.ok {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.status = HealthStatus::Unhealthy;
                warn!(
                    container_id = %self.container_id,
                    consecutive_failures = state.consecutive_failures,
                    "healthcheck probe could not be executed"
                );
                Some((HealthStatus::Unhealthy, outcome.exit_code))
            } else if outcome.exit_code == 0 {
                state.consecutive_failures = 0;
                if state.status != HealthStatus::Healthy {
                    info!(container_id = %self.container_id, "container healthcheck passing");
                }
                state.status = HealthStatus::Healthy;
                // Healthy is re-announced every tick as a keep-alive.
                Some((HealthStatus::Healthy, 0))
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);

                if grace_ended_this_tick {
                    debug!(
                        container_id = %self.container_id,
                        exit_code = outcome.exit_code,
                        "healthcheck failed on the last grace tick; not held against retries"
                    );
                    Some((state.status, outcome.exit_code))
                } else if state.consecutive_failures > self.config.retries {
                    state.status = HealthStatus::Unhealthy;
                    warn!(
                        container_id = %self.container_id,
                        exit_code = outcome.exit_code,
                        consecutive_failures = state.consecutive_failures,
                        retries = self.config.retries,
                        "container healthcheck failing"
                    );
                    Some((HealthStatus::Unhealthy, outcome.exit_code))
                } else {
                    debug!(
                        container_id = %self.container_id,
                        exit_code = outcome.exit_code,
                        consecutive_failures = state.consecutive_failures,
                        "healthcheck failure below retry threshold"
                    );
                    None
                }
            }
        };

        if let Some((status, exit_code)) = emit {
            self.reporter
                .send(&self.container_id, status, exit_code)
                .await;
        }
    }
}
