//! Error types for the logging subsystem

use thiserror::Error;

/// Errors that can occur in the logging subsystem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    /// A global subscriber is already installed, or the filter is unusable
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// Unknown level name or similar
    #[error("Invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}
