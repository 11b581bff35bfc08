//! # Controller Configuration
//!
//! ## Overview
//!
//! Everything a controller needs to know about its environment lives in a
//! [`ControllerConfig`] built through [`ControllerConfigBuilder`] and passed to
//! the constructors explicitly. There is no ambient default namespace and no
//! global retry budget; two controllers in one process can run with entirely
//! different settings.
//!
//! ## Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | `worker_count` | 1 |
//! | `max_retries` | 5 |
//! | `rate_limiter.base_delay` | 5 ms |
//! | `rate_limiter.max_delay` | 1000 s |
//! | `rate_limiter.qps` / `burst` | 10 / 100 |
//! | `reflector.min_backoff` / `max_backoff` | 800 ms / 30 s |
//! | `reflector.resync_period` | disabled |
//! | `reflector.watch_timeout` | none |
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::ControllerConfig;
//! use std::time::Duration;
//!
//! let config = ControllerConfig::builder()
//!     .name("deployments")
//!     .namespace("default")
//!     .worker_count(4)
//!     .max_retries(5)
//!     .base_delay(Duration::from_millis(5))
//!     .resync_period(Duration::from_secs(12 * 60 * 60))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.list_params().namespace.as_deref(), Some("default"));
//! ```
//!
//! Invalid combinations fail at `build()` with an actionable message:
//!
//! ```
//! use core_runtime::config::ControllerConfig;
//!
//! let err = ControllerConfig::builder().worker_count(0).build().unwrap_err();
//! assert!(err.to_string().contains("worker_count"));
//! ```

use crate::error::{Error, Result};
use bridge_traits::ListParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for the worker pool.
pub const MAX_WORKER_COUNT: usize = 256;

/// Default number of buffered events per event bus subscriber.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Backoff shape for requeued keys plus the overall admission rate.
///
/// The per-key delay is `base_delay * 2^failures`, capped at `max_delay`. The
/// overall token bucket admits `qps` requeues per second with bursts of up to
/// `burst`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub qps: f64,
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: 10.0,
            burst: 100,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(Error::Config(
                "rate_limiter.base_delay must be greater than zero".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(Error::Config(format!(
                "rate_limiter.max_delay ({:?}) must not be smaller than base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        if !self.qps.is_finite() || self.qps <= 0.0 {
            return Err(Error::Config(
                "rate_limiter.qps must be a positive number".to_string(),
            ));
        }
        if self.burst == 0 {
            return Err(Error::Config(
                "rate_limiter.burst must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timings for the list/watch loop that feeds the local mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectorConfig {
    /// Re-deliver every cached object to the event handlers on this period.
    pub resync_period: Option<Duration>,
    /// Server-side timeout requested for each watch; the stream is resumed
    /// from the last seen version when it ends.
    pub watch_timeout: Option<Duration>,
    /// First delay after a failed list or watch call.
    pub min_backoff: Duration,
    /// Cap for consecutive failures.
    pub max_backoff: Duration,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            resync_period: None,
            watch_timeout: None,
            min_backoff: Duration::from_millis(800),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReflectorConfig {
    pub fn validate(&self) -> Result<()> {
        if matches!(self.resync_period, Some(period) if period.is_zero()) {
            return Err(Error::Config(
                "reflector.resync_period must be greater than zero when set".to_string(),
            ));
        }
        if matches!(self.watch_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(Error::Config(
                "reflector.watch_timeout must be greater than zero when set".to_string(),
            ));
        }
        if self.min_backoff.is_zero() {
            return Err(Error::Config(
                "reflector.min_backoff must be greater than zero".to_string(),
            ));
        }
        if self.max_backoff < self.min_backoff {
            return Err(Error::Config(
                "reflector.max_backoff must not be smaller than min_backoff".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for one controller (one resource collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Name used in logs, spans and events.
    pub name: String,
    /// Restrict the controller to one namespace. `None` watches all of them.
    pub namespace: Option<String>,
    /// Number of concurrent reconcile workers.
    pub worker_count: usize,
    /// Failed reconciles are requeued this many times before the key is
    /// dropped.
    pub max_retries: u32,
    pub rate_limiter: RateLimiterConfig,
    pub reflector: ReflectorConfig,
    /// Buffer size of the lifecycle event bus.
    pub event_buffer_size: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "controller".to_string(),
            namespace: None,
            worker_count: 1,
            max_retries: 5,
            rate_limiter: RateLimiterConfig::default(),
            reflector: ReflectorConfig::default(),
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl ControllerConfig {
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Controller name cannot be empty".to_string()));
        }

        if let Some(namespace) = &self.namespace {
            if namespace.is_empty() || namespace.contains('/') {
                return Err(Error::Config(format!(
                    "Invalid namespace '{}': must be non-empty and contain no '/'",
                    namespace
                )));
            }
        }

        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(Error::Config(format!(
                "worker_count must be between 1 and {} (got {})",
                MAX_WORKER_COUNT, self.worker_count
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than zero".to_string(),
            ));
        }

        self.rate_limiter.validate()?;
        self.reflector.validate()?;

        Ok(())
    }

    /// Scope handed to the resource source on every list and watch call.
    pub fn list_params(&self) -> ListParams {
        ListParams {
            namespace: self.namespace.clone(),
            timeout: self.reflector.watch_timeout,
        }
    }

    /// Parses a JSON document, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ControllerConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid controller config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

/// Builder for [`ControllerConfig`]. Unset fields keep their defaults.
#[derive(Debug, Default)]
pub struct ControllerConfigBuilder {
    name: Option<String>,
    namespace: Option<String>,
    worker_count: Option<usize>,
    max_retries: Option<u32>,
    rate_limiter: Option<RateLimiterConfig>,
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
    reflector: Option<ReflectorConfig>,
    resync_period: Option<Duration>,
    watch_timeout: Option<Duration>,
    event_buffer_size: Option<usize>,
}

impl ControllerConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restricts list and watch calls to `namespace`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Replaces the whole rate limiter section. `base_delay`/`max_delay`
    /// calls still override individual fields.
    pub fn rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limiter = Some(config);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn reflector(mut self, config: ReflectorConfig) -> Self {
        self.reflector = Some(config);
        self
    }

    pub fn resync_period(mut self, period: Duration) -> Self {
        self.resync_period = Some(period);
        self
    }

    pub fn watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = Some(timeout);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn build(self) -> Result<ControllerConfig> {
        let defaults = ControllerConfig::default();

        let mut rate_limiter = self.rate_limiter.unwrap_or(defaults.rate_limiter);
        if let Some(base_delay) = self.base_delay {
            rate_limiter.base_delay = base_delay;
        }
        if let Some(max_delay) = self.max_delay {
            rate_limiter.max_delay = max_delay;
        }

        let mut reflector = self.reflector.unwrap_or(defaults.reflector);
        if let Some(period) = self.resync_period {
            reflector.resync_period = Some(period);
        }
        if let Some(timeout) = self.watch_timeout {
            reflector.watch_timeout = Some(timeout);
        }

        let config = ControllerConfig {
            name: self.name.unwrap_or(defaults.name),
            namespace: self.namespace,
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            rate_limiter,
            reflector,
            event_buffer_size: self.event_buffer_size.unwrap_or(defaults.event_buffer_size),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::builder().build().unwrap();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.rate_limiter.base_delay, Duration::from_millis(5));
        assert_eq!(config.rate_limiter.max_delay, Duration::from_secs(1000));
        assert!(config.namespace.is_none());
        assert!(config.reflector.resync_period.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ControllerConfig::builder()
            .name("services")
            .namespace("default")
            .worker_count(8)
            .max_retries(3)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_secs(1))
            .resync_period(Duration::from_secs(60))
            .watch_timeout(Duration::from_secs(50))
            .event_buffer_size(16)
            .build()
            .unwrap();

        assert_eq!(config.name, "services");
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.rate_limiter.base_delay, Duration::from_millis(10));
        assert_eq!(config.rate_limiter.max_delay, Duration::from_secs(1));
        assert_eq!(config.reflector.resync_period, Some(Duration::from_secs(60)));
        assert_eq!(config.event_buffer_size, 16);

        let params = config.list_params();
        assert_eq!(params.namespace.as_deref(), Some("default"));
        assert_eq!(params.timeout, Some(Duration::from_secs(50)));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = ControllerConfig::builder().worker_count(0).build().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("worker_count")));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let err = ControllerConfig::builder()
            .base_delay(Duration::from_secs(2))
            .max_delay(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_delay"));
    }

    #[test]
    fn test_rejects_bad_namespace() {
        assert!(ControllerConfig::builder().namespace("").build().is_err());
        assert!(ControllerConfig::builder().namespace("a/b").build().is_err());
    }

    #[test]
    fn test_rejects_zero_resync_period() {
        let err = ControllerConfig::builder()
            .resync_period(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("resync_period"));
    }

    #[test]
    fn test_rate_limiter_validation() {
        let mut limiter = RateLimiterConfig::default();
        limiter.qps = 0.0;
        assert!(limiter.validate().is_err());

        let mut limiter = RateLimiterConfig::default();
        limiter.burst = 0;
        assert!(limiter.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_settings() {
        let config = ControllerConfig::builder()
            .name("deployments")
            .max_retries(7)
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = ControllerConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_json_validates() {
        let mut config = ControllerConfig::default();
        config.worker_count = 0;
        let json = serde_json::to_string(&config).unwrap();
        assert!(ControllerConfig::from_json(&json).is_err());
        assert!(ControllerConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_from_json_fills_missing_fields_with_defaults() {
        let parsed =
            ControllerConfig::from_json(r#"{"name": "services", "namespace": "default"}"#).unwrap();
        assert_eq!(parsed.name, "services");
        assert_eq!(parsed.namespace.as_deref(), Some("default"));
        assert_eq!(parsed.worker_count, 1);
        assert_eq!(parsed.max_retries, 5);
        assert_eq!(parsed.rate_limiter, RateLimiterConfig::default());
    }
}
