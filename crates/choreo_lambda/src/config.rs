use std::time::Duration;

use thiserror::Error;

use crate::adapters::staging::FetchPolicy;

pub const STAGING_BUCKET_VAR: &str = "CHOREO_STAGING_BUCKET";
pub const STAGING_PREFIX_VAR: &str = "CHOREO_STAGING_PREFIX";
pub const FETCH_TIMEOUT_VAR: &str = "CHOREO_FETCH_TIMEOUT_MS";
pub const FETCH_POLL_INTERVAL_VAR: &str = "CHOREO_FETCH_POLL_INTERVAL_MS";
pub const DISPATCH_MODE_VAR: &str = "CHOREO_DISPATCH_MODE";
pub const DISPATCH_TIMEOUT_VAR: &str = "CHOREO_DISPATCH_TIMEOUT_MS";

pub const DEFAULT_STAGING_PREFIX: &str = "choreography/staging";
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_FETCH_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Lambda,
    Sqs,
    Http,
    None,
}

impl DispatchMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lambda" => Some(Self::Lambda),
            "sqs" => Some(Self::Sqs),
            "http" => Some(Self::Http),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub staging_bucket: Option<String>,
    pub staging_prefix: String,
    pub fetch_policy: FetchPolicy,
    pub dispatch_mode: DispatchMode,
    pub dispatch_timeout: Duration,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let dispatch_mode = match read(DISPATCH_MODE_VAR) {
            None => DispatchMode::Lambda,
            Some(value) => DispatchMode::parse(&value).ok_or(ConfigError::InvalidValue {
                name: DISPATCH_MODE_VAR,
                expected: "one of lambda, sqs, http, none",
                value,
            })?,
        };

        Ok(Self {
            staging_bucket: read(STAGING_BUCKET_VAR),
            staging_prefix: read(STAGING_PREFIX_VAR)
                .unwrap_or_else(|| DEFAULT_STAGING_PREFIX.to_string()),
            fetch_policy: FetchPolicy {
                timeout: read_millis(read(FETCH_TIMEOUT_VAR), FETCH_TIMEOUT_VAR, DEFAULT_FETCH_TIMEOUT_MS)?,
                poll_interval: read_millis(
                    read(FETCH_POLL_INTERVAL_VAR),
                    FETCH_POLL_INTERVAL_VAR,
                    DEFAULT_FETCH_POLL_INTERVAL_MS,
                )?,
            },
            dispatch_mode,
            dispatch_timeout: read_millis(
                read(DISPATCH_TIMEOUT_VAR),
                DISPATCH_TIMEOUT_VAR,
                DEFAULT_DISPATCH_TIMEOUT_MS,
            )?,
        })
    }
}

fn read_millis(
    value: Option<String>,
    name: &'static str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(Duration::from_millis(default_ms));
    };
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidValue {
            name,
            expected: "a positive number of milliseconds",
            value,
        }),
    }
}
