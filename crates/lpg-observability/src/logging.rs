//! Logging setup for the resource graph engine.
//!
//! Structured logging through the tracing ecosystem. `RUST_LOG` wins over
//! the configured level when set.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Crates whose events are enabled by the default filter.
pub const LOG_TARGETS: &[&str] = &["lpg_core", "lpg_connectors"];

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, one event per line.
    Text,
    /// One JSON object per event, for log aggregation.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for [`LOG_TARGETS`] when `RUST_LOG` is unset.
    pub level: Level,
    pub format: LogFormat,
    /// Emit an event when a span opens and closes.
    pub span_events: bool,
    /// Include file and line.
    pub location: bool,
    pub thread_ids: bool,
    /// Include the module path.
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            span_events: false,
            location: true,
            thread_ids: false,
            target: true,
        }
    }
}

impl LoggingConfig {
    /// Verbose output for local work.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            span_events: true,
            thread_ids: true,
            ..Self::default()
        }
    }

    /// JSON output for log aggregation.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            location: false,
            ..Self::default()
        }
    }

    /// Quiet output for tests; warnings and errors only.
    pub fn test() -> Self {
        Self {
            level: Level::WARN,
            location: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Filter directive used when `RUST_LOG` is not set.
    pub fn default_directive(&self) -> String {
        LOG_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_span_events(spans)
            .with_file(self.location)
            .with_line_number(self.location)
            .with_thread_ids(self.thread_ids)
            .with_target(self.target);

        match self.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

/// Initializes the logging system with default configuration.
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::default());
}

/// Initializes the logging system with the given configuration.
///
/// Panics if a global subscriber is already set; use [`try_init_logging`]
/// where that can happen.
pub fn init_logging_with_config(config: LoggingConfig) {
    if let Err(e) = try_init_logging(config) {
        panic!("Failed to initialize logging: {}", e);
    }
}

/// Initializes logging, returning an error if a subscriber is already set.
pub fn try_init_logging(config: LoggingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.filter())
        .try_init()
}

/// Sets up quiet logging for a test binary. Safe to call more than once.
pub fn init_test_logging() {
    let _ = try_init_logging(LoggingConfig::test());
}

/// Creates a span for one refresh of a session.
#[macro_export]
macro_rules! refresh_span {
    ($session_id:expr, $sequence:expr) => {
        tracing::info_span!("refresh", session = %$session_id, sequence = $sequence)
    };
}

/// Creates a span for one discovery run.
#[macro_export]
macro_rules! discovery_span {
    ($system:expr) => {
        tracing::info_span!("discovery", system = %$system)
    };
    ($system:expr, $($field:tt)*) => {
        tracing::info_span!("discovery", system = %$system, $($field)*)
    };
}
