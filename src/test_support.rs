use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::HealthcheckConfig;
use crate::probe::{ProbeOutcome, ProbeRunner};
use crate::report::{StatusUpdate, SyncChannel};

pub(crate) fn test_config(interval: u64, start_period: u64, retries: u32) -> HealthcheckConfig {
    HealthcheckConfig {
        test: vec!["/bin/true".into()],
        interval_secs: interval,
        timeout_secs: 5,
        start_period_secs: start_period,
        retries,
        enabled: true,
    }
}

/// Writes a bundle directory with the given `config.json` contents and
/// returns its path. Callers clean up with `remove_dir_all`.
pub(crate) fn write_bundle(config_json: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("healthmon-bundle-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&path).expect("create bundle dir");
    std::fs::write(path.join("config.json"), config_json).expect("write bundle config");
    path
}

/// Probe runner that replays a scripted queue of outcomes, then repeats a
/// fallback outcome (success unless built with `always`).
#[derive(Clone)]
pub(crate) struct ScriptedRunner {
    outcomes: Arc<StdMutex<VecDeque<ProbeOutcome>>>,
    fallback: ProbeOutcome,
    calls: Arc<AtomicUsize>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self {
            outcomes: Arc::new(StdMutex::new(VecDeque::new())),
            fallback: ProbeOutcome::exited(0),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ScriptedRunner {
    pub(crate) fn with_outcomes(outcomes: Vec<ProbeOutcome>) -> Self {
        Self {
            outcomes: Arc::new(StdMutex::new(outcomes.into())),
            ..Default::default()
        }
    }

    pub(crate) fn always(outcome: ProbeOutcome) -> Self {
        Self {
            fallback: outcome,
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProbeRunner for ScriptedRunner {
    async fn execute(&self, _config: &HealthcheckConfig, _container_id: &str) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .expect("lock outcomes")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Sync channel that records every frame, or fails every write.
#[derive(Clone, Default)]
pub(crate) struct RecordingChannel {
    frames: Arc<StdMutex<Vec<(u8, Vec<u8>)>>>,
    fail_writes: Arc<AtomicBool>,
}

impl RecordingChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let channel = Self::default();
        channel.fail_writes.store(true, Ordering::SeqCst);
        channel
    }

    pub(crate) fn frames(&self) -> Vec<(u8, Vec<u8>)> {
        self.frames.lock().expect("lock frames").clone()
    }

    pub(crate) fn updates(&self) -> Vec<StatusUpdate> {
        self.frames()
            .into_iter()
            .map(|(_, payload)| serde_json::from_slice(&payload).expect("decode status update"))
            .collect()
    }

    pub(crate) async fn wait_for_updates(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if self.frames.lock().expect("lock frames").len() >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "timed out waiting for {count} status updates, saw {}",
                self.frames().len()
            )
        });
    }
}

#[async_trait]
impl SyncChannel for RecordingChannel {
    async fn write_framed(&self, tag: u8, payload: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sync pipe closed"));
        }
        self.frames
            .lock()
            .expect("lock frames")
            .push((tag, payload.to_vec()));
        Ok(())
    }
}
