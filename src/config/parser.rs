//! Configuration file parser
//!
//! One `param value` pair per line; blank lines and `#` comments are skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use super::{Config, LogLevel};

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid line format
    #[error("Invalid line format at line {0}: {1}")]
    Format(usize, String),

    /// Invalid parameter value
    #[error("Invalid value for parameter '{0}' at line {1}: {2}")]
    Value(String, usize, String),
}

/// Parse a configuration file
pub fn parse_config_file(path: &Path) -> Result<Config, ConfigParseError> {
    let file = File::open(path)?;
    parse_config(BufReader::new(file))
}

/// Parse configuration lines from any reader
pub fn parse_config<R: BufRead>(reader: R) -> Result<Config, ConfigParseError> {
    let mut config = Config::default();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (param, value) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| ConfigParseError::Format(line_num + 1, line.to_string()))?;

        apply_config_param(&mut config, &param.to_lowercase(), value.trim(), line_num + 1)?;
    }

    Ok(config)
}

/// Apply a configuration parameter to the config
fn apply_config_param(config: &mut Config, param: &str, value: &str, line_num: usize) -> Result<(), ConfigParseError> {
    match param {
        "stack-limit" => {
            config.engine.value_stack_limit = parse_value(param, value, line_num)?;
        }
        "gc-threshold" => {
            config.engine.gc_threshold = parse_value(param, value, line_num)?;
        }
        "debug" => {
            config.engine.debug = parse_yes_no(param, value, line_num)?;
        }
        "loglevel" => {
            config.log_level = match value.to_lowercase().as_str() {
                "debug" => LogLevel::Debug,
                "verbose" => LogLevel::Verbose,
                "notice" => LogLevel::Notice,
                "warning" => LogLevel::Warning,
                _ => return Err(ConfigParseError::Value(param.to_string(), line_num, value.to_string())),
            };
        }
        _ => {
            log::warn!("unknown configuration parameter '{}' at line {} - skipping", param, line_num);
        }
    }

    Ok(())
}

/// Parse a value that implements FromStr
fn parse_value<T: FromStr>(param: &str, value: &str, line_num: usize) -> Result<T, ConfigParseError> {
    value.parse::<T>()
        .map_err(|_| ConfigParseError::Value(param.to_string(), line_num, value.to_string()))
}

/// Parse a yes/no value
fn parse_yes_no(param: &str, value: &str, line_num: usize) -> Result<bool, ConfigParseError> {
    match value.to_lowercase().as_str() {
        "yes" | "1" => Ok(true),
        "no" | "0" => Ok(false),
        _ => Err(ConfigParseError::Value(param.to_string(), line_num, value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_basic_config() {
        let config_content = r#"
# Engine limits
stack-limit 512
gc-threshold 0

debug yes
loglevel verbose
some-future-option 3
"#;

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();
        write(path, config_content).unwrap();

        let config = parse_config_file(path).unwrap();

        assert_eq!(config.engine.value_stack_limit, 512);
        assert_eq!(config.engine.gc_threshold, 0);
        assert!(config.engine.debug);
        assert_eq!(config.log_level, LogLevel::Verbose);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_config("stack-limit lots\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigParseError::Value(ref p, 1, _) if p == "stack-limit"));

        let err = parse_config("\n\ndebug\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigParseError::Format(3, _)));

        let err = parse_config("loglevel loud".as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for parameter 'loglevel' at line 1: loud");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_config_file(&dir.path().join("missing.conf")).unwrap_err();
        assert!(matches!(err, ConfigParseError::Io(_)));
    }

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("test", "yes", 1).unwrap(), true);
        assert_eq!(parse_yes_no("test", "NO", 1).unwrap(), false);
        assert_eq!(parse_yes_no("test", "1", 1).unwrap(), true);
        assert!(parse_yes_no("test", "invalid", 1).is_err());
    }
}
