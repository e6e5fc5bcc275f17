//! # lpg-observability
//!
//! Logging infrastructure for the least-privilege resource graph.
//!
//! Provides the tracing subscriber setup shared by services and tests, plus
//! span macros for refreshes and discovery runs.

pub mod logging;

pub use logging::{
    init_logging, init_logging_with_config, init_test_logging, try_init_logging, LogFormat,
    LoggingConfig,
};
