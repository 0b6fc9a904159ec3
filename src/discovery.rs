use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{
    self, ConfigError, HealthcheckConfig, MAX_INTERVAL_SECS, MAX_RETRIES, MAX_SHELL_COMMAND_LEN,
    MAX_START_PERIOD_SECS, MAX_TIMEOUT_SECS, MIN_INTERVAL_SECS, MIN_RETRIES,
    MIN_START_PERIOD_SECS, MIN_TIMEOUT_SECS,
};

/// OCI annotation carrying the JSON-encoded healthcheck definition.
pub const HEALTHCHECK_ANNOTATION: &str = "io.podman.healthcheck";

const SHELL: &str = "/bin/sh";

/// Failure to turn an annotation string into a valid configuration.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("healthcheck annotation is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("healthcheck test command is empty")]
    MissingCommand,
    #[error("unsupported healthcheck command kind {tag:?}")]
    UnsupportedCommand { tag: String },
    #[error("CMD-SHELL takes exactly one command string, got {count} arguments")]
    ShellArity { count: usize },
    #[error("CMD-SHELL command must be between 1 and {max} bytes, got {len}", max = MAX_SHELL_COMMAND_LEN)]
    ShellCommandLength { len: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure to discover a healthcheck from an OCI bundle.
///
/// The missing-file and missing-annotation variants are not errors at the
/// monitor level; `is_missing` lets callers continue without healthchecks.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("bundle config not found at {path}")]
    ConfigMissing { path: PathBuf },
    #[error("no healthcheck annotation in bundle config")]
    AnnotationMissing,
    #[error("failed to read bundle config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bundle config at {path} is not valid JSON: {source}")]
    InvalidBundle {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid healthcheck annotation: {0}")]
    InvalidAnnotation(#[from] ParseError),
}

impl DiscoveryError {
    /// True when no healthcheck was declared, as opposed to a broken one.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            DiscoveryError::ConfigMissing { .. } | DiscoveryError::AnnotationMissing
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawAnnotation {
    test: Vec<String>,
    interval: i64,
    timeout: i64,
    start_period: i64,
    retries: i64,
}

#[derive(Serialize)]
struct CanonicalAnnotation<'a> {
    test: Vec<&'a str>,
    interval: u64,
    timeout: u64,
    start_period: u64,
    retries: u32,
}

/// Parses the decoded value of the healthcheck annotation.
///
/// Every field is required; range violations and malformed test commands fail
/// the whole parse, no partially built configuration escapes. On success the
/// configuration comes back with `enabled = true`.
pub fn parse_annotation(annotation: &str) -> Result<HealthcheckConfig, ParseError> {
    let raw: RawAnnotation = serde_json::from_str(annotation)?;
    let test = expand_test_command(&raw.test)?;

    let config = HealthcheckConfig {
        test,
        interval_secs: config::check_range(
            "interval",
            raw.interval,
            MIN_INTERVAL_SECS,
            MAX_INTERVAL_SECS,
        )? as u64,
        timeout_secs: config::check_range(
            "timeout",
            raw.timeout,
            MIN_TIMEOUT_SECS,
            MAX_TIMEOUT_SECS,
        )? as u64,
        start_period_secs: config::check_range(
            "start_period",
            raw.start_period,
            MIN_START_PERIOD_SECS,
            MAX_START_PERIOD_SECS,
        )? as u64,
        retries: config::check_range("retries", raw.retries, MIN_RETRIES, MAX_RETRIES)? as u32,
        enabled: true,
    };

    Ok(config)
}

fn expand_test_command(test: &[String]) -> Result<Vec<String>, ParseError> {
    let (tag, args) = match test.split_first() {
        Some(split) => split,
        None => return Err(ParseError::MissingCommand),
    };

    match tag.as_str() {
        "CMD" => {
            if args.is_empty() {
                return Err(ParseError::MissingCommand);
            }
            Ok(args.to_vec())
        }
        "CMD-SHELL" => {
            let command = match args {
                [command] => command,
                _ => return Err(ParseError::ShellArity { count: args.len() }),
            };
            if command.is_empty() || command.len() > MAX_SHELL_COMMAND_LEN {
                return Err(ParseError::ShellCommandLength {
                    len: command.len(),
                });
            }
            Ok(vec![SHELL.to_string(), "-c".to_string(), command.clone()])
        }
        other => Err(ParseError::UnsupportedCommand {
            tag: other.to_string(),
        }),
    }
}

/// Reads `<bundle>/config.json` and parses the healthcheck annotation, if any.
pub fn discover_from_bundle(bundle: &Path) -> Result<HealthcheckConfig, DiscoveryError> {
    let path = bundle.join("config.json");
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "bundle config not present");
            return Err(DiscoveryError::ConfigMissing { path });
        }
        Err(err) => {
            return Err(DiscoveryError::Read {
                path,
                source: err,
            })
        }
    };

    let bundle_config: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|source| DiscoveryError::InvalidBundle {
            path: path.clone(),
            source,
        })?;

    let annotation = bundle_config
        .get("annotations")
        .and_then(|annotations| annotations.get(HEALTHCHECK_ANNOTATION))
        .and_then(|value| value.as_str())
        .ok_or(DiscoveryError::AnnotationMissing)?;

    Ok(parse_annotation(annotation)?)
}

/// Renders the canonical annotation form of a parsed configuration.
///
/// The expanded argv is re-tagged as a plain `CMD`, so parsing the rendered
/// string yields the same configuration back.
pub fn render_annotation(config: &HealthcheckConfig) -> String {
    let mut test = Vec::with_capacity(config.test.len() + 1);
    test.push("CMD");
    test.extend(config.test.iter().map(String::as_str));

    let canonical = CanonicalAnnotation {
        test,
        interval: config.interval_secs,
        timeout: config.timeout_secs,
        start_period: config.start_period_secs,
        retries: config.retries,
    };

    serde_json::to_string(&canonical).expect("annotation serialization cannot fail")
}
