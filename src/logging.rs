//! Structured logging setup for axoncast
//!
//! stdout carries the node protocol, so every layer configured here writes
//! to stderr.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{format::FmtSpan, time::UtcTime},
    layer::SubscriberExt,
    Layer, Registry,
};
use uuid::Uuid;

use crate::error::AxonError;

/// Correlation ID grouping every log line of one node run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new random correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a short string representation for logging
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log configuration for different environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter
    pub level: String,
    /// Enable structured JSON output
    pub json: bool,
    /// Enable ANSI colors in output
    pub colors: bool,
    /// Include file and line numbers
    pub include_location: bool,
    /// Include thread names
    pub include_thread: bool,
    /// Include span open/close events
    pub include_spans: bool,
    /// Custom log targets and their levels
    pub targets: HashMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            colors: false,
            include_location: false,
            include_thread: false,
            include_spans: false,
            targets: HashMap::new(),
        }
    }
}

impl LogConfig {
    /// Replace the base level filter
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Switch JSON output on or off
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, AxonError> {
        let mut env_filter = EnvFilter::try_new(&self.level)
            .map_err(|e| AxonError::config(format!("invalid log level {:?}: {}", self.level, e)))?;

        for (target, level) in &self.targets {
            let directive = format!("{}={}", target, level)
                .parse()
                .map_err(|e| AxonError::config(format!("invalid log directive: {}", e)))?;
            env_filter = env_filter.add_directive(directive);
        }
        Ok(env_filter)
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: &LogConfig) -> Result<(), AxonError> {
    let env_filter = config.env_filter()?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .with_thread_names(config.include_thread)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(if config.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    let subscriber = Registry::default().with(env_filter).with(if config.json {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.with_ansi(config.colors).boxed()
    });

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AxonError::config(format!("logging already initialized: {}", e)))
}

/// Production logging configuration
pub fn production_config() -> LogConfig {
    LogConfig {
        level: "info".to_string(),
        json: true,
        colors: false,
        include_location: false,
        include_thread: false,
        include_spans: false,
        targets: [("axoncast".to_string(), "info".to_string())]
            .into_iter()
            .collect(),
    }
}

/// Development logging configuration
pub fn development_config() -> LogConfig {
    LogConfig {
        level: "debug".to_string(),
        json: false,
        colors: true,
        include_location: true,
        include_thread: true,
        include_spans: true,
        targets: [
            ("axoncast".to_string(), "debug".to_string()),
            ("tokio".to_string(), "info".to_string()),
        ]
        .into_iter()
        .collect(),
    }
}
