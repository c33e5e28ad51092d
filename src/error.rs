//! Error types for the probe monitor
//!
//! Two families live here:
//!
//! - [`MonitorError`]: failures of the registry/orchestration layer itself that
//!   are returned to the caller (duplicate registration, unknown probe, ...).
//! - [`OperationalError`]: conditions that must never raise into the engine
//!   (stuck probes, commands addressed to unknown probes). These are handed to an
//!   [`ErrorSink`] instead.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::error;

/// Result type alias for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors returned by the monitor and its actors
#[derive(Debug)]
pub enum MonitorError {
    /// A probe with the same name is already registered
    AlreadyExistingProbe(String),

    /// No probe is registered under that name
    UnknownProbe(String),

    /// The actor already has a live worker thread
    AlreadyRunning(String),

    /// A hook of the probe did not return within the budget
    Busy(String),

    /// The probe rejected its configuration arguments
    Configure { probe: String, reason: String },

    /// I/O error (thread spawning)
    Io(std::io::Error),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::AlreadyExistingProbe(name) => {
                write!(f, "probe '{}' already exists", name)
            }
            MonitorError::UnknownProbe(name) => write!(f, "probe '{}' does not exist", name),
            MonitorError::AlreadyRunning(name) => write!(f, "probe '{}' is already running", name),
            MonitorError::Busy(name) => {
                write!(f, "probe '{}' did not leave its current hook in time", name)
            }
            MonitorError::Configure { probe, reason } => {
                write!(f, "failed to configure probe '{}': {}", probe, reason)
            }
            MonitorError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io(err)
    }
}

/// Category of an operational error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// An operation did not complete in time (e.g. a probe stuck in `main()`)
    OperationCancelled,

    /// A command could not be carried out (e.g. unknown probe)
    CommandError,
}

/// Operational error reported to the engine without interrupting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationalError {
    pub code: ErrorCode,
    pub message: String,
}

impl OperationalError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn stuck_probe(name: &str) -> Self {
        Self::new(
            ErrorCode::OperationCancelled,
            format!("Timeout! Probe '{name}' seems to be stuck in its 'main()' method."),
        )
    }

    pub fn busy_probe(name: &str) -> Self {
        Self::new(
            ErrorCode::OperationCancelled,
            format!("Timeout! Probe '{name}' is stuck in a hook, configuration dropped."),
        )
    }

    pub fn arm_timeout(name: &str) -> Self {
        Self::new(
            ErrorCode::OperationCancelled,
            format!("Timeout! Probe '{name}' was not armed in time, stop requested."),
        )
    }

    pub fn unknown_probe(name: &str) -> Self {
        Self::new(
            ErrorCode::CommandError,
            format!("Probe '{name}' does not exist"),
        )
    }
}

impl fmt::Display for OperationalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// Controller-wide sink recording operational errors
pub trait ErrorSink: Send + Sync {
    fn set_error(&self, error: OperationalError);
}

/// Sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn set_error(&self, error: OperationalError) {
        error!(code = ?error.code, "{}", error.message);
    }
}

/// Sink that logs and keeps every reported error for later inspection
#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    errors: Mutex<Vec<OperationalError>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<OperationalError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take(&self) -> Vec<OperationalError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ErrorSink for RecordingErrorSink {
    fn set_error(&self, error: OperationalError) {
        TracingErrorSink.set_error(error.clone());
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }
}
