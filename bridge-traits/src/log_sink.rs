//! Host logging sink.
//!
//! The core logs through `tracing`; `core_runtime::logging` mirrors every
//! event that survives filtering into a [`LoggerSink`] so a host can route
//! controller logs (reconcile failures, dropped keys, relists) into its own
//! pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(BridgeError::OperationFailed(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

/// Structured log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Target module/component
    pub target: String,
    pub message: String,
    /// Structured fields (e.g. `key`, `attempt`, `resource_version`)
    pub fields: HashMap<String, String>,
    /// Name of the innermost span the event was emitted in
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    /// The object key the entry refers to, when the event recorded one.
    pub fn object_key(&self) -> Option<&str> {
        self.fields.get("key").map(String::as_str)
    }
}

/// Logger sink trait
///
/// Forwards structured logs from the core to a host logging pipeline.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::{LoggerSink, LogEntry, LogLevel};
///
/// async fn report_drop(logger: &dyn LoggerSink, key: &str) {
///     let entry = LogEntry::new(LogLevel::Error, "core_controller", "dropping key")
///         .with_field("key", key);
///     logger.log(entry).await.ok();
/// }
/// ```
#[async_trait]
pub trait LoggerSink: Send + Sync {
    /// Forward a log entry to the host logging system
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Flush any buffered logs
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Minimum level this sink wants; lower entries are filtered at the source.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Writes entries to stderr. Meant for development runs.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

#[async_trait]
impl LoggerSink for ConsoleLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level < self.min_level {
            return Ok(());
        }

        let mut fields: Vec<_> = entry.fields.iter().collect();
        fields.sort();
        let rendered: Vec<String> = fields
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        eprintln!(
            "[{}] {:>5} {}: {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.level.as_str().to_uppercase(),
            entry.target,
            entry.message,
            rendered.join(" ")
        );
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(LogLevel::Error, "core_controller", "dropping key")
            .with_field("key", "default/web")
            .with_field("attempts", "5")
            .with_span("worker");

        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.object_key(), Some("default/web"));
        assert_eq!(entry.fields.get("attempts"), Some(&"5".to_string()));
        assert_eq!(entry.span.as_deref(), Some("worker"));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert!(LogLevel::Error > LogLevel::Info);
    }

    #[core_async::test]
    async fn test_console_logger_respects_min_level() {
        let logger = ConsoleLogger {
            min_level: LogLevel::Warn,
        };
        logger
            .log(LogEntry::new(LogLevel::Debug, "test", "filtered"))
            .await
            .unwrap();
        logger
            .log(LogEntry::new(LogLevel::Error, "test", "printed"))
            .await
            .unwrap();
    }
}
