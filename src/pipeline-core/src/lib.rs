use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("MalformedOverlay: {overlay}: {reason}")]
    MalformedOverlay { overlay: String, reason: String },

    #[error("InvalidVersionFormat: {0}. Expected X.Y.Z or X.Y.Z-prerelease")]
    InvalidVersionFormat(String),

    #[error("OverlayNotFound: {0}")]
    OverlayNotFound(String),

    #[error("OverlaysDirMissing: {}", .0.display())]
    OverlaysDirMissing(PathBuf),

    #[error("WriteFailure: {}: {source}", .path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("UneditableField: {overlay}: {field}")]
    UneditableField { overlay: String, field: String },

    #[error("BatchAborted: {} overlay(s) failed: {}", .0.len(), .0.join(", "))]
    BatchAborted(Vec<String>),

    #[error("ToolNotFound: {0}")]
    ToolNotFound(String),

    #[error("ToolFailed: {tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("IoError: {}: {source}", .path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("DeserializationError: {0}")]
    DeserializationError(String),

    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("InvalidConfig: {0}")]
    InvalidConfig(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Stable snake_case name of the variant, used in machine-readable output.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::MalformedOverlay { .. } => "malformed_overlay",
            Error::InvalidVersionFormat(_) => "invalid_version_format",
            Error::OverlayNotFound(_) => "overlay_not_found",
            Error::OverlaysDirMissing(_) => "overlays_dir_missing",
            Error::WriteFailure { .. } => "write_failure",
            Error::UneditableField { .. } => "uneditable_field",
            Error::BatchAborted(_) => "batch_aborted",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ToolFailed { .. } => "tool_failed",
            Error::IoError { .. } => "io_error",
            Error::DeserializationError(_) => "deserialization_error",
            Error::SerializationError(_) => "serialization_error",
            Error::InvalidConfig(_) => "invalid_config",
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoError {
            path: path.into(),
            source,
        }
    }
}

pub mod config;
pub use config::Config;

pub mod fs;

/// Log integrations
pub mod telemetry;
