use metrics::{counter, gauge};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
}

pub fn record_probe_result(result: &str) {
    counter!(
        "healthmon_probes_total",
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn record_status_update(status: &str) {
    counter!(
        "healthmon_status_updates_total",
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_active_timers(count: usize) {
    gauge!("healthmon_active_timers").set(count as f64);
}
