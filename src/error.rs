// src/error.rs
//! Unified error handling for vsrc-core
//!
//! Only construction-time problems are errors: invalid configurations,
//! inconsistent calibration data and failures of the storage collaborator.
//! Numeric saturation inside the per-sample models is intentional and never
//! reported here.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema_validator::ValidationError;

/// Unified error type for the simulation core
#[derive(Debug, Clone, Error)]
pub enum VsrcError {
    /// Configuration values that cannot be turned into registers
    #[error("[CONFIG] {component}: {reason} ({})", .context.operation)]
    Configuration {
        /// Component that rejected the configuration
        component: String,
        /// What is wrong with it
        reason: String,
        /// Where the error was raised
        context: ErrorContext,
    },

    /// Several range or consistency violations found at once
    #[error("[CONFIG] {component}: {} violation(s): {}", .violations.len(), join_violations(.violations))]
    Validation {
        /// Component whose configuration was validated
        component: String,
        /// Every violation found
        violations: Vec<ValidationError>,
    },

    /// Calibration measurements that cannot produce a usable gain/offset pair
    #[error("[CAL] {component}: {reason}")]
    Calibration {
        /// Calibration set or channel
        component: String,
        /// Why the pair is unusable
        reason: String,
        /// Where the error was raised
        context: ErrorContext,
    },

    /// Malformed sample buffers handed over by the storage layer
    #[error("[DATA] Invalid {data_type}: {reason}{}", describe_mismatch(.expected, .actual))]
    InvalidData {
        /// Kind of data that was rejected
        data_type: String,
        /// Why it was rejected
        reason: String,
        /// Expected value, for mismatches
        expected: Option<String>,
        /// Actual value, for mismatches
        actual: Option<String>,
        /// Where the error was raised
        context: ErrorContext,
    },

    /// Failures reported by a sample source or sink
    #[error("[STREAM] {stage} failed: {reason}")]
    Stream {
        /// Failing side of the stream
        stage: StreamStage,
        /// Failure description
        reason: String,
        /// Where the error was raised
        context: ErrorContext,
    },

    /// File access of the configuration loader
    #[error("[IO] {operation}: {reason}")]
    Io {
        /// File operation that failed
        operation: String,
        /// Underlying I/O error
        reason: String,
    },

    /// TOML/JSON (de)serialization errors
    #[error("[PARSE] {format}: {reason}")]
    Parse {
        /// Input format, TOML or JSON
        format: String,
        /// Parser message
        reason: String,
    },
}

/// Side of the streaming contract an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStage {
    /// Reading buffers from the sample source
    Source,
    /// Background reader thread
    Prefetch,
    /// Writing results to the sample sink
    Sink,
}

impl fmt::Display for StreamStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStage::Source => write!(f, "SOURCE"),
            StreamStage::Prefetch => write!(f, "PREFETCH"),
            StreamStage::Sink => write!(f, "SINK"),
        }
    }
}

fn join_violations(violations: &[ValidationError]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_mismatch(expected: &Option<String>, actual: &Option<String>) -> String {
    match (expected, actual) {
        (Some(exp), Some(act)) => format!(" (expected: {}, got: {})", exp, act),
        _ => String::new(),
    }
}

/// Error context for debugging and analysis
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    /// Component raising the error
    pub component: String,
    /// Operation in progress
    pub operation: String,
    /// Source file, when captured
    pub file: Option<&'static str>,
    /// Source line, when captured
    pub line: Option<u32>,
    /// Free-form key/value details
    pub additional_info: BTreeMap<String, String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            file: None,
            line: None,
            additional_info: BTreeMap::new(),
        }
    }

    /// Create error context with file and line information
    pub fn with_location(
        component: &str,
        operation: &str,
        file: &'static str,
        line: u32,
    ) -> Self {
        let mut context = Self::new(component, operation);
        context.file = Some(file);
        context.line = Some(line);
        context
    }

    /// Add additional information to the context
    pub fn add_info<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.additional_info.insert(key.into(), value.into());
        self
    }
}

/// Macro for creating error context with file and line info
#[macro_export]
macro_rules! error_context {
    ($component:expr, $operation:expr) => {
        $crate::error::ErrorContext::with_location($component, $operation, file!(), line!())
    };
}

impl VsrcError {
    /// Field-level context of a configuration error, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            VsrcError::Configuration { context, .. } => {
                context.additional_info.get("field").map(String::as_str)
            }
            VsrcError::Validation { violations, .. } => {
                violations.first().map(|v| v.field.as_str())
            }
            _ => None,
        }
    }

    /// True for errors caused by user-supplied configuration
    pub fn is_configuration(&self) -> bool {
        matches!(self, VsrcError::Configuration { .. } | VsrcError::Validation { .. })
    }
}

impl From<toml::de::Error> for VsrcError {
    fn from(err: toml::de::Error) -> Self {
        VsrcError::Parse {
            format: "toml".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for VsrcError {
    fn from(err: toml::ser::Error) -> Self {
        VsrcError::Parse {
            format: "toml".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for VsrcError {
    fn from(err: serde_json::Error) -> Self {
        VsrcError::Parse {
            format: "json".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type alias for vsrc operations
pub type VsrcResult<T> = Result<T, VsrcError>;

/// Error builder for convenient error construction
pub struct VsrcErrorBuilder {
    component: String,
    operation: String,
}

impl VsrcErrorBuilder {
    /// Builder for errors raised by `operation` of `component`
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Configuration error
    pub fn configuration(self, reason: &str) -> VsrcError {
        let context = ErrorContext::new(&self.component, &self.operation);
        VsrcError::Configuration {
            component: self.component,
            reason: reason.to_string(),
            context,
        }
    }

    /// Configuration error pinned to one offending field
    pub fn invalid_field(self, field: &str, value: impl fmt::Display, reason: &str) -> VsrcError {
        let context = ErrorContext::new(&self.component, &self.operation)
            .add_info("field", field)
            .add_info("value", value.to_string());
        VsrcError::Configuration {
            component: self.component,
            reason: format!("'{}' = {}: {}", field, value, reason),
            context,
        }
    }

    /// Calibration error
    pub fn calibration(self, reason: &str) -> VsrcError {
        let context = ErrorContext::new(&self.component, &self.operation);
        VsrcError::Calibration {
            component: self.component,
            reason: reason.to_string(),
            context,
        }
    }

    /// Malformed data error
    pub fn invalid_data(self, data_type: &str, reason: &str) -> VsrcError {
        VsrcError::InvalidData {
            data_type: data_type.to_string(),
            reason: reason.to_string(),
            expected: None,
            actual: None,
            context: ErrorContext::new(&self.component, &self.operation),
        }
    }

    /// Arrays of one buffer differ in length
    pub fn length_mismatch(self, data_type: &str, expected: usize, actual: usize) -> VsrcError {
        VsrcError::InvalidData {
            data_type: data_type.to_string(),
            reason: "array lengths differ".to_string(),
            expected: Some(expected.to_string()),
            actual: Some(actual.to_string()),
            context: ErrorContext::new(&self.component, &self.operation),
        }
    }

    /// Source, prefetch or sink failure
    pub fn stream(self, stage: StreamStage, reason: &str) -> VsrcError {
        VsrcError::Stream {
            stage,
            reason: reason.to_string(),
            context: ErrorContext::new(&self.component, &self.operation),
        }
    }

    /// Collected schema violations
    pub fn validation(self, violations: Vec<ValidationError>) -> VsrcError {
        VsrcError::Validation {
            component: self.component,
            violations,
        }
    }
}

/// Convenience trait for wrapping foreign errors raised while streaming
pub trait IntoVsrcError<T> {
    /// Map the error into [`VsrcError::Stream`] for `stage`
    fn vsrc_err(self, stage: StreamStage, component: &str, operation: &str) -> VsrcResult<T>;
}

impl<T, E> IntoVsrcError<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn vsrc_err(self, stage: StreamStage, component: &str, operation: &str) -> VsrcResult<T> {
        self.map_err(|err| VsrcError::Stream {
            stage,
            reason: err.to_string(),
            context: ErrorContext::new(component, operation),
        })
    }
}
