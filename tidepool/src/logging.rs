//! Process-wide logging facade with pluggable sinks.
//!
//! The engine reports its diagnostics through a [`LogSink`], a plain trait
//! with one method per severity. A lazily-created process-wide sink and
//! level apply to every message unless an engine installs its own override
//! (see `Engine::logger`). The default sink forwards to `tracing` so the
//! engine participates in whatever subscriber the host process configured.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

/// Message severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fine-grained tracing of engine internals.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal operational messages.
    Info,
    /// Something unexpected, but the engine can continue.
    Warning,
    /// An operation failed.
    Error,
    /// The engine is in an unrecoverable state.
    Critical,
}

impl LogLevel {
    /// Lowercase name of the level, as it appears in emitted messages.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

/// Destination for leveled diagnostic messages.
///
/// Any concrete sink implements the six severity methods; [`LogSink::emit`]
/// dispatches by [`LogLevel`] and is what the engine calls internally.
pub trait LogSink: Send + Sync {
    /// Record a trace-level message.
    fn trace(&self, message: &str);
    /// Record a debug-level message.
    fn debug(&self, message: &str);
    /// Record an info-level message.
    fn info(&self, message: &str);
    /// Record a warning-level message.
    fn warning(&self, message: &str);
    /// Record an error-level message.
    fn error(&self, message: &str);
    /// Record a critical-level message.
    fn critical(&self, message: &str);

    /// Dispatch a message to the method matching `level`.
    fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => self.trace(message),
            LogLevel::Debug => self.debug(message),
            LogLevel::Info => self.info(message),
            LogLevel::Warning => self.warning(message),
            LogLevel::Error => self.error(message),
            LogLevel::Critical => self.critical(message),
        }
    }
}

/// Default sink: forwards every message to the `tracing` ecosystem.
///
/// Critical has no `tracing` equivalent and is emitted as an error event
/// with a `critical` field set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn trace(&self, message: &str) {
        tracing::trace!(target: "tidepool", "{}", message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "tidepool", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "tidepool", "{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "tidepool", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "tidepool", "{}", message);
    }

    fn critical(&self, message: &str) {
        tracing::error!(target: "tidepool", critical = true, "{}", message);
    }
}

struct GlobalLogging {
    level: LogLevel,
    sink: Arc<dyn LogSink>,
}

static GLOBAL: OnceLock<RwLock<GlobalLogging>> = OnceLock::new();

fn global() -> &'static RwLock<GlobalLogging> {
    GLOBAL.get_or_init(|| {
        RwLock::new(GlobalLogging {
            level: LogLevel::Warning,
            sink: Arc::new(TracingSink),
        })
    })
}

/// Set the process-wide log level. Messages below it are dropped.
pub fn set_global_level(level: LogLevel) {
    global().write().level = level;
}

/// Current process-wide log level.
pub fn global_level() -> LogLevel {
    global().read().level
}

/// Replace the process-wide sink.
pub fn set_global_sink(sink: Arc<dyn LogSink>) {
    global().write().sink = sink;
}

/// Current process-wide sink.
pub fn global_sink() -> Arc<dyn LogSink> {
    Arc::clone(&global().read().sink)
}

/// Emit a message through the process-wide sink, subject to the global level.
pub fn log(level: LogLevel, message: &str) {
    let (threshold, sink) = {
        let state = global().read();
        (state.level, Arc::clone(&state.sink))
    };
    if level >= threshold {
        sink.emit(level, message);
    }
}

/// Trace-level message through the process-wide sink.
pub fn trace(message: &str) {
    log(LogLevel::Trace, message);
}

/// Debug-level message through the process-wide sink.
pub fn debug(message: &str) {
    log(LogLevel::Debug, message);
}

/// Info-level message through the process-wide sink.
pub fn info(message: &str) {
    log(LogLevel::Info, message);
}

/// Warning-level message through the process-wide sink.
pub fn warning(message: &str) {
    log(LogLevel::Warning, message);
}

/// Error-level message through the process-wide sink.
pub fn error(message: &str) {
    log(LogLevel::Error, message);
}

/// Critical-level message through the process-wide sink.
pub fn critical(message: &str) {
    log(LogLevel::Critical, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that records everything it receives.
    pub(crate) struct CaptureSink {
        messages: Mutex<Vec<(LogLevel, String)>>,
    }

    impl CaptureSink {
        pub(crate) fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn take(&self) -> Vec<(LogLevel, String)> {
            std::mem::take(&mut self.messages.lock())
        }
    }

    impl LogSink for CaptureSink {
        fn trace(&self, message: &str) {
            self.messages.lock().push((LogLevel::Trace, message.into()));
        }
        fn debug(&self, message: &str) {
            self.messages.lock().push((LogLevel::Debug, message.into()));
        }
        fn info(&self, message: &str) {
            self.messages.lock().push((LogLevel::Info, message.into()));
        }
        fn warning(&self, message: &str) {
            self.messages
                .lock()
                .push((LogLevel::Warning, message.into()));
        }
        fn error(&self, message: &str) {
            self.messages.lock().push((LogLevel::Error, message.into()));
        }
        fn critical(&self, message: &str) {
            self.messages
                .lock()
                .push((LogLevel::Critical, message.into()));
        }
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn test_emit_dispatches_by_level() {
        let sink = CaptureSink::new();
        sink.emit(LogLevel::Info, "hello");
        sink.emit(LogLevel::Critical, "bad");
        let messages = sink.take();
        assert_eq!(
            messages,
            vec![
                (LogLevel::Info, "hello".to_string()),
                (LogLevel::Critical, "bad".to_string()),
            ]
        );
    }
}
