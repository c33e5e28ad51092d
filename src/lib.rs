pub mod actors;
pub mod config;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod probes;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use actors::{ProbeMode, Timeouts};
pub use error::{ErrorSink, MonitorError, MonitorResult, OperationalError};
pub use monitor::Monitor;
pub use probe::{Console, ConsoleLevel, Probe, ProbeContext, TracingConsole};

/// Health report produced by a probe on each cycle.
///
/// A negative `code` means the target is degraded, `0` is nominal and positive
/// codes are probe-specific soft signals. A fresh status is produced per cycle,
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeStatus {
    pub code: Option<i64>,
    pub info: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ProbeStatus {
    pub fn new(code: Option<i64>) -> Self {
        Self {
            code,
            info: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_info(mut self, info: impl Into<serde_json::Value>) -> Self {
        self.info = Some(info.into());
        self
    }

    /// An absent code never counts as degraded.
    pub fn is_degraded(&self) -> bool {
        self.code.is_some_and(|code| code < 0)
    }
}

impl Default for ProbeStatus {
    fn default() -> Self {
        Self::new(Some(0))
    }
}

/// Aggregate health of the target across all live probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    Degraded,
    Nominal,
}

impl TargetStatus {
    /// Degraded as soon as one status is degraded, nominal otherwise (including
    /// when there is nothing to aggregate).
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a ProbeStatus>) -> TargetStatus {
        if statuses.into_iter().any(ProbeStatus::is_degraded) {
            TargetStatus::Degraded
        } else {
            TargetStatus::Nominal
        }
    }

    pub fn code(self) -> i32 {
        match self {
            TargetStatus::Degraded => -1,
            TargetStatus::Nominal => 1,
        }
    }

    pub fn is_ok(self) -> bool {
        self.code() >= 0
    }
}
