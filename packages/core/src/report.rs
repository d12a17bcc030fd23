//! Leveled report messages and the sinks that receive them.
//!
//! The reporting channel carries operational messages (flush failures,
//! connection loss) from the engine to whoever watches it: the local
//! `tracing` subscriber on the host, or the host's Reporter for a guest.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a [`LogMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// A single report message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    /// The component that raised the message, e.g. `"bus.filesystem"`.
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogMessage {
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            source: source.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.timestamp.to_rfc3339(),
            self.level,
            self.source,
            self.message
        )
    }
}

/// Receives report messages.
pub trait ReportSink: Send + Sync {
    fn report(&self, message: LogMessage);

    fn report_batch(&self, messages: Vec<LogMessage>) {
        for message in messages {
            self.report(message);
        }
    }
}

/// Forwards report messages to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn report(&self, message: LogMessage) {
        let LogMessage {
            level,
            source,
            message,
            ..
        } = message;
        match level {
            LogLevel::Trace => tracing::trace!(source = %source, "{}", message),
            LogLevel::Debug => tracing::debug!(source = %source, "{}", message),
            LogLevel::Info => tracing::info!(source = %source, "{}", message),
            LogLevel::Warning => tracing::warn!(source = %source, "{}", message),
            LogLevel::Error => tracing::error!(source = %source, "{}", message),
            LogLevel::Critical => tracing::error!(source = %source, critical = true, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn message_display() {
        let message = LogMessage::new(LogLevel::Warning, "bus.registry", "flush failed");
        let display = message.to_string();
        assert!(display.contains("[warning] bus.registry: flush failed"));
    }

    #[test]
    fn default_batch_reports_each_message() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Collect(Mutex<Vec<LogMessage>>);
        impl ReportSink for Collect {
            fn report(&self, message: LogMessage) {
                self.0.lock().unwrap().push(message);
            }
        }

        let sink = Collect::default();
        sink.report_batch(vec![
            LogMessage::new(LogLevel::Info, "a", "one"),
            LogMessage::new(LogLevel::Info, "b", "two"),
        ]);
        assert_eq!(sink.0.lock().unwrap().len(), 2);
    }
}
