//! Error types for the integration

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a device handle
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device did not answer in time")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("device rejected the local key")]
    Auth,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors loading device type profiles
#[derive(Debug, Error)]
pub enum DeviceConfigError {
    /// Failed to read a profile file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a profile
    #[error("failed to parse device profile {config_type}: {source}")]
    ParseYaml {
        config_type: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Directory not found
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// Two profiles with the same config type
    #[error("device profile '{config_type}' is defined twice")]
    Duplicate { config_type: String },

    /// Profile parsed but is unusable
    #[error("invalid device profile '{config_type}': {reason}")]
    Invalid { config_type: String, reason: String },
}

/// Result type for profile loading
pub type DeviceConfigResult<T> = Result<T, DeviceConfigError>;

/// Connection parameters that cannot be used
#[derive(Debug, Error)]
pub enum ConnectionConfigError {
    #[error("'{0}' must not be empty")]
    Empty(&'static str),

    #[error("invalid connection parameters: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Why an entry could not be brought to the current version
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("entry version {0} is newer than this integration supports")]
    FromFuture(u32),

    #[error("no migration step upgrades version {0}")]
    NoStep(u32),

    #[error("type of device {0} could not be inferred")]
    UnresolvedType(String),

    #[error("unknown device type '{0}'")]
    UnknownType(String),

    #[error("unknown protocol version {0}")]
    InvalidProtocolVersion(serde_json::Value),

    #[error(transparent)]
    Connection(#[from] ConnectionConfigError),
}
