//! Error types for Folio.
//!
//! Every fallible operation in the crate returns [`FolioError`]. The variants
//! follow the failure taxonomy of the processing pipeline:
//!
//! - `EngineUnavailable` - an OCR engine is not installed or not reachable; the
//!   coordinator skips it and moves on
//! - `Ocr` - an engine ran but produced no usable result
//! - `BatchTimeout` / `BatchFailure` - a page batch did not complete; retried by
//!   the scheduler and quarantined after `max_retries`
//! - `Translation` - the translation collaborator failed (quota, network)
//! - `Cache` - semantic cache IO; logged and skipped by the pipeline
//! - `Configuration` - invalid or missing configuration; always propagates
//!
//! Low OCR quality, failed structural validation and exhausted correction
//! attempts are *not* errors. They are carried as data on the respective
//! result types.
//!
//! **System errors bubble up unchanged:** `FolioError::Io` comes from
//! `std::io::Error` via `?`. The only wrapping happens in the batch scheduler,
//! which keeps it as the `source` of the `BatchFailure` for the batch it stopped.
//!
//! # Example
//!
//! ```rust
//! use folio::{FolioError, Result};
//!
//! fn load(path: &str) -> Result<String> {
//!     let content = std::fs::read_to_string(path)?;
//!
//!     if content.is_empty() {
//!         return Err(FolioError::validation(format!("File is empty: {}", path)));
//!     }
//!
//!     Ok(content)
//! }
//! ```
use thiserror::Error;

/// Result type alias using `FolioError`.
pub type Result<T> = std::result::Result<T, FolioError>;

/// Main error type for all Folio operations.
#[derive(Debug, Error)]
pub enum FolioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR engine '{engine}' unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("OCR error: {message}")]
    Ocr {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Batch {batch_number} timed out after {timeout_secs}s")]
    BatchTimeout { batch_number: usize, timeout_secs: u64 },

    #[error("Batch {batch_number} failed: {message}")]
    BatchFailure {
        batch_number: usize,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Translation error: {message}")]
    Translation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Missing dependency: {0}")]
    MissingDependency(String),
}

impl From<serde_json::Error> for FolioError {
    fn from(err: serde_json::Error) -> Self {
        FolioError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::encode::Error> for FolioError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        FolioError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::decode::Error> for FolioError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        FolioError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl FolioError {
    error_constructor!(ocr, Ocr);
    error_constructor!(translation, Translation);
    error_constructor!(validation, Validation);
    error_constructor!(cache, Cache);
    error_constructor!(serialization, Serialization);
    error_constructor!(configuration, Configuration);

    /// Create an `EngineUnavailable` error.
    pub fn engine_unavailable<E: Into<String>, R: Into<String>>(engine: E, reason: R) -> Self {
        Self::EngineUnavailable {
            engine: engine.into(),
            reason: reason.into(),
        }
    }

    /// Attribute a retryable error to the batch it stopped.
    ///
    /// Timeouts, existing batch failures and non-retryable errors are returned unchanged.
    pub fn batch_failure(batch_number: usize, error: FolioError) -> Self {
        match error {
            FolioError::BatchTimeout { .. } | FolioError::BatchFailure { .. } => error,
            error if !error.is_retryable() => error,
            error => Self::BatchFailure {
                batch_number,
                message: error.to_string(),
                source: Some(Box::new(error)),
            },
        }
    }

    /// Whether a batch that failed with this error may be attempted again.
    ///
    /// Configuration and missing-dependency errors will fail identically on
    /// every attempt, so they are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FolioError::BatchTimeout { .. }
                | FolioError::BatchFailure { .. }
                | FolioError::Ocr { .. }
                | FolioError::EngineUnavailable { .. }
                | FolioError::Io(_)
        )
    }
}
