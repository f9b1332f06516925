//! Configuration module
//!
//! Engine limits and logging settings, with defaults and an optional
//! configuration file.

mod parser;

pub use parser::{parse_config_file, ConfigParseError};

use log::LevelFilter;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Engine configuration
    pub engine: EngineConfig,

    /// Log level
    pub log_level: LogLevel,
}

/// Configuration of one engine instance
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum number of values on the evaluation stack
    pub value_stack_limit: usize,

    /// Allocations between automatic collections (0 disables automatic collection)
    pub gc_threshold: usize,

    /// Enable debug output
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            value_stack_limit: 100_000, // 100K stack slots
            gc_threshold: 10_000,
            debug: false,
        }
    }
}

/// Log level configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - most verbose
    Debug,

    /// Verbose level
    Verbose,

    /// Notice level - default
    #[default]
    Notice,

    /// Warning level
    Warning,
}

impl LogLevel {
    /// Matching `log` filter
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Trace,
            LogLevel::Verbose => LevelFilter::Debug,
            LogLevel::Notice => LevelFilter::Info,
            LogLevel::Warning => LevelFilter::Warn,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigParseError> {
        let path = path.into();
        parse_config_file(&path)
    }

    /// Set the global `log` max level from this configuration
    pub fn apply_log_level(&self) {
        log::set_max_level(self.log_level.to_level_filter());
    }

    /// Get a configuration parameter by name
    pub fn get(&self, param: &str) -> Option<String> {
        match param {
            "stack-limit" => Some(self.engine.value_stack_limit.to_string()),
            "gc-threshold" => Some(self.engine.gc_threshold.to_string()),
            "debug" => Some(if self.engine.debug { "yes" } else { "no" }.to_string()),
            "loglevel" => Some(self.log_level.as_str().to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.get("stack-limit").as_deref(), Some("100000"));
        assert_eq!(config.get("gc-threshold").as_deref(), Some("10000"));
        assert_eq!(config.get("debug").as_deref(), Some("no"));
        assert_eq!(config.get("loglevel").as_deref(), Some("notice"));
        assert_eq!(config.get("port"), None);
    }

    #[test]
    fn test_level_filter() {
        assert_eq!(LogLevel::Debug.to_level_filter(), LevelFilter::Trace);
        assert_eq!(LogLevel::Warning.to_level_filter(), LevelFilter::Warn);
    }

    #[test]
    fn test_from_file_sets_log_level() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("verbose.conf");
        std::fs::write(&path, "loglevel verbose\nstack-limit 64\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.engine.value_stack_limit, 64);
        config.apply_log_level();
        assert_eq!(log::max_level(), LevelFilter::Debug);

        let path = dir.path().join("warning.conf");
        std::fs::write(&path, "loglevel warning\n").unwrap();
        Config::from_file(&path).unwrap().apply_log_level();
        assert_eq!(log::max_level(), LevelFilter::Warn);
    }
}
