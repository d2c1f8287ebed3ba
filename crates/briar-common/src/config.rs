//! Database configuration.
//!
//! All dependencies are injected at construction; tests instantiate isolated
//! databases by pointing the configuration at a private directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CHECKPOINT_THRESHOLD, DEFAULT_HOST, DEFAULT_PORT};

/// Configuration for one database instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding one file per table, the schema descriptor, and the
    /// WAL file.
    pub data_dir: PathBuf,
    /// Number of WRITE records that triggers a checkpoint.
    pub checkpoint_threshold: usize,
    /// Host address the shell binds to.
    pub host: String,
    /// TCP port the shell listens on.
    pub port: u16,
    /// Maximum concurrent client sessions.
    pub max_connections: usize,
}

impl DatabaseConfig {
    /// Creates a configuration rooted at `data_dir` with defaults elsewhere.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the checkpoint threshold.
    #[must_use]
    pub fn with_checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    /// Sets the listen port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.checkpoint_threshold == 0 {
            return Err("checkpoint_threshold must be at least 1".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.checkpoint_threshold, DEFAULT_CHECKPOINT_THRESHOLD);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = DatabaseConfig::new("/tmp/db").with_checkpoint_threshold(0);
        assert!(config.validate().is_err());
    }
}
