//! Pipeline configuration.
//!
//! Loaded from YAML. Every field has a default so an empty document is a
//! valid configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default saltinel marker, used for both ends of a block.
pub const DEFAULT_SALTINEL: &str = "<<SALTINEL>>";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Invalid pattern for signature '{name}': {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// The pair of markers that delimit an inner message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaltinelMarkers {
    pub open: String,
    pub close: String,
}

impl SaltinelMarkers {
    /// Uses the same marker text for both ends of a block.
    pub fn symmetric(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self {
            open: marker.clone(),
            close: marker,
        }
    }

    /// Uses distinct opening and closing markers.
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// True when the opening marker also closes a block.
    pub fn is_symmetric(&self) -> bool {
        self.open == self.close
    }
}

impl Default for SaltinelMarkers {
    fn default() -> Self {
        Self::symmetric(DEFAULT_SALTINEL)
    }
}

/// A user-supplied transient failure signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Reported as the escalation reason.
    pub name: String,
    /// Regular expression matched against a message's full line.
    pub pattern: String,
}

/// Top-level configuration for the log pipeline and its run supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Markers framing inner messages.
    pub saltinel: SaltinelMarkers,
    /// Directory receiving `instrumentsNNN.log` files.
    pub console_dir: PathBuf,
    /// Extra failure signatures on top of the built-in set.
    pub signatures: Vec<SignatureConfig>,
    /// Total launches allowed, first attempt included.
    pub max_attempts: u32,
    /// Seconds without output before a run that has not yet started is
    /// considered stalled (0 = disabled).
    pub idle_timeout_secs: u64,
    /// Remove ANSI escape sequences before assembling lines.
    pub strip_ansi: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            saltinel: SaltinelMarkers::default(),
            console_dir: PathBuf::from("build/console"),
            signatures: Vec::new(),
            max_attempts: 5,
            idle_timeout_secs: 30,
            strip_ansi: true,
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.saltinel.open.trim().is_empty() || self.saltinel.close.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "saltinel markers must not be blank".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        for signature in &self.signatures {
            if signature.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "signature names must not be blank".to_string(),
                ));
            }
            Regex::new(&signature.pattern).map_err(|source| ConfigError::Pattern {
                name: signature.name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Idle timeout as a duration, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}
