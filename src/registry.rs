use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::telemetry;
use crate::timer::{HealthTimer, TimerError, TimerSnapshot};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("healthcheck timer already registered for container {container_id}")]
    Duplicate { container_id: String },
    #[error("healthcheck registry is shut down")]
    ShutDown,
    #[error(transparent)]
    Timer(#[from] TimerError),
}

/// All active healthcheck timers of one monitor process.
///
/// The registry owns every timer; workers only hold the shared tick state,
/// and teardown performs stop-then-join before dropping a timer, so no
/// worker ever outlives the state it references. A timer is present in the
/// map exactly while it is started and not yet freed.
pub struct TimerRegistry {
    timers: Mutex<HashMap<String, HealthTimer>>,
    closed: AtomicBool,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Starts a timer and registers it under its container id.
    ///
    /// The duplicate check runs before the timer is started, so a conflicting
    /// registration never leaves a stray worker behind.
    pub async fn register(&self, mut timer: HealthTimer) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::ShutDown);
        }

        let mut timers = self.timers.lock().await;
        if timers.contains_key(timer.container_id()) {
            return Err(RegistryError::Duplicate {
                container_id: timer.container_id().to_string(),
            });
        }

        timer.start().await?;
        timers.insert(timer.container_id().to_string(), timer);
        telemetry::record_active_timers(timers.len());
        Ok(())
    }

    /// Stops and frees the timer for one container. Returns whether one was
    /// registered.
    pub async fn deregister(&self, container_id: &str) -> bool {
        let removed = {
            let mut timers = self.timers.lock().await;
            let removed = timers.remove(container_id);
            telemetry::record_active_timers(timers.len());
            removed
        };

        match removed {
            Some(mut timer) => {
                timer.stop().await;
                debug!(container_id = %container_id, "healthcheck timer deregistered");
                true
            }
            None => false,
        }
    }

    /// Best-effort administrative view of one timer's state.
    pub async fn lookup(&self, container_id: &str) -> Option<TimerSnapshot> {
        let timers = self.timers.lock().await;
        match timers.get(container_id) {
            Some(timer) => Some(timer.snapshot().await),
            None => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.timers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.timers.lock().await.is_empty()
    }

    /// Stops and joins every timer and rejects registrations from then on.
    ///
    /// Called once at monitor exit; calling it again is a no-op on the
    /// already-empty registry.
    pub async fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, mut timer) in timers.drain() {
            timer.stop().await;
        }
        telemetry::record_active_timers(0);

        if count > 0 {
            info!(stopped = count, "healthcheck registry torn down");
        }
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
