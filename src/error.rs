//! Error handling for stagegraph
//!
//! This module defines the crate-level error type and a Result alias used by
//! configuration and the inspection binary. Engine and partition operations
//! have their own narrower error enums, which convert into this one.

use crate::engine::EngineError;
use crate::partition::PartitionError;
use thiserror::Error;

/// Main error type for stagegraph operations
#[derive(Error, Debug)]
pub enum StageError {
    /// Graph loading, editing or compilation failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Loop or patch export failed
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StageError>,
    },
}

impl StageError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        StageError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        StageError::Serialization(err.to_string())
    }
}

/// Result type alias for stagegraph operations
pub type Result<T> = std::result::Result<T, StageError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<StageError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
