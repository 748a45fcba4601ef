//! Loading [`LinkerConfig`] from TOML files.
//!
//! # Example
//!
//! ```toml
//! [execution]
//! timeout_ms = 5000
//! break_on_sigint = true
//! ```

use std::path::Path;

use tracing::debug;

use crate::LinkerConfig;

impl LinkerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        debug!(path = %path.display(), "Loading linker configuration");

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config = LinkerConfig::from_toml("").unwrap();
        assert_eq!(config, LinkerConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r"
            [execution]
            timeout_ms = 1_500
            break_on_sigint = true
        ";

        let config = LinkerConfig::from_toml(toml).unwrap();

        assert_eq!(config.execution.timeout_ms, Some(1500));
        assert!(config.execution.break_on_sigint);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = LinkerConfig::from_toml(invalid);
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = LinkerConfig::from_file("/nonexistent/esm-linker.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
