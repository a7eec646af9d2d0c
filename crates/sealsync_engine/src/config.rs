//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use rand::Rng;
use sealsync_protocol::API_VERSION;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server URL.
    pub server_url: String,
    /// API version sent with every request.
    pub api_version: String,
    /// Records per page, in both directions.
    pub page_size: usize,
    /// Attempts per page before giving up.
    pub max_attempts: u32,
    /// Factor applied to the page size after a too-large or timed-out page.
    pub shrink_factor: f64,
    /// Minimum spacing between the start of two syncs.
    pub min_sync_interval: Duration,
    /// Fixed request timeout, replacing the computed one.
    pub timeout_override: Option<Duration>,
    /// Backoff for throttling and transient server errors.
    pub retry: RetryConfig,
    /// Structurally check every outbound record before push.
    pub force_validation: bool,
    /// Skip the pre-flight session expiry check.
    pub skip_session_check: bool,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_version: API_VERSION.to_string(),
            page_size: 150,
            max_attempts: 4,
            shrink_factor: 0.25,
            min_sync_interval: Duration::from_millis(100),
            timeout_override: None,
            retry: RetryConfig::default(),
            force_validation: false,
            skip_session_check: false,
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the attempts per page.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the minimum spacing between syncs.
    pub fn with_min_sync_interval(mut self, interval: Duration) -> Self {
        self.min_sync_interval = interval;
        self
    }

    /// Sets a fixed request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables outbound record validation.
    pub fn with_force_validation(mut self, enabled: bool) -> Self {
        self.force_validation = enabled;
        self
    }

    /// Disables the pre-flight session check.
    pub fn with_skip_session_check(mut self, skip: bool) -> Self {
        self.skip_session_check = skip;
        self
    }

    /// Applies environment overrides on top of this configuration.
    pub fn with_overrides(mut self, overrides: &EnvOverrides) -> Self {
        if let Some(timeout) = overrides.sync_timeout {
            self.timeout_override = Some(timeout);
        }
        if let Some(min) = overrides.min_retry_wait {
            self.retry.initial_delay = min;
        }
        if let Some(max) = overrides.max_retry_wait {
            self.retry.max_delay = max;
        }
        if let Some(force) = overrides.force_validation {
            self.force_validation = force;
        }
        if let Some(skip) = overrides.skip_session_check {
            self.skip_session_check = skip;
        }
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for backoff under throttling.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates the default backoff: 100 ms doubling up to 1 s.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration that never waits.
    pub fn no_delay() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before retry number `attempt` (1-indexed).
    /// Attempt 0 is the first try and never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment variable names read by [`EnvOverrides`].
pub mod env {
    /// Request timeout in seconds.
    pub const SYNC_TIMEOUT_SECS: &str = "SEALSYNC_SYNC_TIMEOUT_SECS";
    /// Initial retry wait in milliseconds.
    pub const MIN_RETRY_WAIT_MS: &str = "SEALSYNC_MIN_RETRY_WAIT_MS";
    /// Maximum retry wait in milliseconds.
    pub const MAX_RETRY_WAIT_MS: &str = "SEALSYNC_MAX_RETRY_WAIT_MS";
    /// Boolean: validate outbound records.
    pub const FORCE_VALIDATION: &str = "SEALSYNC_FORCE_VALIDATION";
    /// Boolean: skip the session check.
    pub const SKIP_SESSION_CHECK: &str = "SEALSYNC_SKIP_SESSION_CHECK";
}

/// Optional overrides read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// Request timeout.
    pub sync_timeout: Option<Duration>,
    /// Initial retry wait.
    pub min_retry_wait: Option<Duration>,
    /// Maximum retry wait.
    pub max_retry_wait: Option<Duration>,
    /// Validate outbound records.
    pub force_validation: Option<bool>,
    /// Skip the session check.
    pub skip_session_check: Option<bool>,
}

impl EnvOverrides {
    /// Reads overrides from the process environment.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads overrides through an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// A set but unparsable value is a `Validation` error, as is a minimum
    /// retry wait above the maximum.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SyncResult<Self> {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let overrides = Self {
            sync_timeout: read(env::SYNC_TIMEOUT_SECS)
                .map(|v| parse_u64(env::SYNC_TIMEOUT_SECS, &v).map(Duration::from_secs))
                .transpose()?,
            min_retry_wait: read(env::MIN_RETRY_WAIT_MS)
                .map(|v| parse_u64(env::MIN_RETRY_WAIT_MS, &v).map(Duration::from_millis))
                .transpose()?,
            max_retry_wait: read(env::MAX_RETRY_WAIT_MS)
                .map(|v| parse_u64(env::MAX_RETRY_WAIT_MS, &v).map(Duration::from_millis))
                .transpose()?,
            force_validation: read(env::FORCE_VALIDATION)
                .map(|v| parse_bool(env::FORCE_VALIDATION, &v))
                .transpose()?,
            skip_session_check: read(env::SKIP_SESSION_CHECK)
                .map(|v| parse_bool(env::SKIP_SESSION_CHECK, &v))
                .transpose()?,
        };

        if let (Some(min), Some(max)) = (overrides.min_retry_wait, overrides.max_retry_wait) {
            if min > max {
                return Err(SyncError::validation(format!(
                    "{} ({min:?}) exceeds {} ({max:?})",
                    env::MIN_RETRY_WAIT_MS,
                    env::MAX_RETRY_WAIT_MS
                )));
            }
        }

        Ok(overrides)
    }

    /// Returns true if nothing is overridden.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_u64(name: &str, value: &str) -> SyncResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| SyncError::validation(format!("{name}: expected an integer, got {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> SyncResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SyncError::validation(format!(
            "{name}: expected a boolean, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("https://sync.example.com")
            .with_page_size(0)
            .with_timeout(Duration::from_secs(60))
            .with_force_validation(true);

        assert_eq!(config.server_url, "https://sync.example.com");
        assert_eq!(config.api_version, "20200115");
        assert_eq!(config.page_size, 1);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.timeout_override, Some(Duration::from_secs(60)));
        assert!(config.force_validation);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let config = RetryConfig::default();
        let delays: Vec<u128> = (1..=6)
            .map(|n| config.delay_for_attempt(n).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let config = RetryConfig::default().with_jitter(true);
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn no_delay_never_waits() {
        let config = RetryConfig::no_delay();
        assert_eq!(config.delay_for_attempt(5), Duration::ZERO);
    }

    #[test]
    fn overrides_parse_and_apply() {
        let overrides = EnvOverrides::from_lookup(lookup(&[
            (env::SYNC_TIMEOUT_SECS, "90"),
            (env::MIN_RETRY_WAIT_MS, "50"),
            (env::MAX_RETRY_WAIT_MS, "400"),
            (env::FORCE_VALIDATION, "true"),
            (env::SKIP_SESSION_CHECK, "0"),
        ]))
        .unwrap();
        assert!(!overrides.is_empty());

        let config = SyncConfig::default().with_overrides(&overrides);
        assert_eq!(config.timeout_override, Some(Duration::from_secs(90)));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(50));
        assert_eq!(config.retry.max_delay, Duration::from_millis(400));
        assert!(config.force_validation);
        assert!(!config.skip_session_check);
    }

    #[test]
    fn absent_and_blank_overrides_are_ignored() {
        let overrides =
            EnvOverrides::from_lookup(lookup(&[(env::SYNC_TIMEOUT_SECS, "  ")])).unwrap();
        assert!(overrides.is_empty());
        let config = SyncConfig::default().with_overrides(&overrides);
        assert_eq!(config.timeout_override, None);
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let err = EnvOverrides::from_lookup(lookup(&[(env::SYNC_TIMEOUT_SECS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        assert!(
            EnvOverrides::from_lookup(lookup(&[(env::FORCE_VALIDATION, "maybe")])).is_err()
        );
        assert!(EnvOverrides::from_lookup(lookup(&[
            (env::MIN_RETRY_WAIT_MS, "500"),
            (env::MAX_RETRY_WAIT_MS, "100"),
        ]))
        .is_err());
    }
}
