use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use crate::discovery;
use crate::probe::DynProbeRunner;
use crate::registry::TimerRegistry;
use crate::report::StatusReporter;
use crate::timer::HealthTimer;

/// Wires healthcheck discovery into the registry for one container.
///
/// Returns `Ok(false)` when the bundle declares no healthcheck; the monitor
/// continues without one. A declared-but-invalid healthcheck is an error for
/// the caller to log; it must never prevent the container from running.
pub async fn enable_container_healthcheck(
    registry: &TimerRegistry,
    bundle: &Path,
    container_id: &str,
    runner: DynProbeRunner,
    reporter: StatusReporter,
) -> anyhow::Result<bool> {
    let config = match discovery::discover_from_bundle(bundle) {
        Ok(config) => config,
        Err(err) if err.is_missing() => {
            debug!(container_id = %container_id, "no healthcheck declared for container");
            return Ok(false);
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("invalid healthcheck for container {container_id}"));
        }
    };

    info!(
        container_id = %container_id,
        interval_secs = config.interval_secs,
        start_period_secs = config.start_period_secs,
        retries = config.retries,
        "healthcheck discovered"
    );

    let timer = HealthTimer::new(container_id, config, runner, reporter);
    registry
        .register(timer)
        .await
        .with_context(|| format!("failed to start healthcheck for container {container_id}"))?;

    Ok(true)
}
