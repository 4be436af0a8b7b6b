//! Resolver runtime configuration.
//!
//! # Responsibility
//! - Hold the knobs that bound one `identify` call: lock wait and replay count.
//! - Load overrides from the process environment.
//!
//! # Invariants
//! - `max_attempts >= 1`.
//! - `busy_timeout` is non-zero; a zero wait turns every lock into a conflict.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Environment variable overriding `ResolverConfig::max_attempts`.
pub const ENV_MAX_ATTEMPTS: &str = "IDENTITY_MAX_ATTEMPTS";
/// Environment variable overriding `ResolverConfig::busy_timeout` (milliseconds).
pub const ENV_BUSY_TIMEOUT_MS: &str = "IDENTITY_BUSY_TIMEOUT_MS";

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 25;
const MAX_ATTEMPTS_CEILING: u32 = 20;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Value could not be parsed as an unsigned integer.
    InvalidNumber { key: &'static str, value: String },
    /// Value parsed but lies outside the accepted range.
    OutOfRange { key: &'static str, detail: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNumber { key, value } => {
                write!(f, "`{key}` expects an unsigned integer, got `{value}`")
            }
            Self::OutOfRange { key, detail } => write!(f, "`{key}` out of range: {detail}"),
        }
    }
}

impl Error for ConfigError {}

/// Bounds for one identify call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Total transaction attempts, first try included.
    pub max_attempts: u32,
    /// How long a transaction waits for the write lock before reporting a conflict.
    pub busy_timeout: Duration,
    /// Pause before replaying after a conflict; scaled by attempt number.
    pub retry_backoff: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl ResolverConfig {
    /// Builds config from defaults plus process environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds config from defaults plus overrides supplied by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = non_blank(lookup(ENV_MAX_ATTEMPTS)) {
            let value = parse_u64(ENV_MAX_ATTEMPTS, &raw)?;
            config.max_attempts = u32::try_from(value).map_err(|_| ConfigError::OutOfRange {
                key: ENV_MAX_ATTEMPTS,
                detail: format!("{value} does not fit in u32"),
            })?;
        }
        if let Some(raw) = non_blank(lookup(ENV_BUSY_TIMEOUT_MS)) {
            config.busy_timeout = Duration::from_millis(parse_u64(ENV_BUSY_TIMEOUT_MS, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks range invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_CEILING {
            return Err(ConfigError::OutOfRange {
                key: ENV_MAX_ATTEMPTS,
                detail: format!(
                    "{} not in 1..={MAX_ATTEMPTS_CEILING}",
                    self.max_attempts
                ),
            });
        }
        if self.busy_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: ENV_BUSY_TIMEOUT_MS,
                detail: "busy timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}
