//! Error type shared by the configuration layer and the estimator constructors.
//!
//! The per-cycle pipeline itself never fails: degenerate situations (no observations, zero
//! total weighting, an empty resampling pass) have defined fallbacks and are only logged.
//! Errors are reserved for things a caller must fix, such as a malformed configuration file.
use std::io;

use thiserror::Error;

/// Errors raised while loading configuration or constructing a [`crate::locator::SelfLocator`].
#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown pose calculator '{0}'")]
    UnknownPoseCalculator(String),
}

impl From<serde_json::Error> for LocatorError {
    fn from(e: serde_json::Error) -> Self {
        LocatorError::Parse(e.to_string())
    }
}

impl From<serde_yaml::Error> for LocatorError {
    fn from(e: serde_yaml::Error) -> Self {
        LocatorError::Parse(e.to_string())
    }
}

impl From<toml::de::Error> for LocatorError {
    fn from(e: toml::de::Error) -> Self {
        LocatorError::Parse(e.to_string())
    }
}

impl From<toml::ser::Error> for LocatorError {
    fn from(e: toml::ser::Error) -> Self {
        LocatorError::Parse(e.to_string())
    }
}

impl From<csv::Error> for LocatorError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            if let csv::ErrorKind::Io(io) = e.into_kind() {
                return LocatorError::Io(io);
            }
            return LocatorError::Parse("csv I/O error".to_string());
        }
        LocatorError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LocatorError>;
