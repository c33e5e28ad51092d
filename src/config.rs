use std::time::Duration;

use tracing::trace;

use crate::actors::{ProbeMode, Timeouts};

/// Monitor-wide settings
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct MonitorSettings {
    /// Global switch for the four send-cycle hooks
    #[serde(default = "default_hooks_enabled")]
    pub hooks_enabled: bool,

    /// Budget for a blocking probe to report armed
    #[serde(default = "default_timeout_secs")]
    pub arm_timeout_secs: f64,

    /// Budget for joining probes on stop
    #[serde(default = "default_timeout_secs")]
    pub join_timeout_secs: f64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            hooks_enabled: default_hooks_enabled(),
            arm_timeout_secs: default_timeout_secs(),
            join_timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl MonitorSettings {
    /// Convert to durations, falling back to the defaults for unusable values
    pub fn timeouts(&self) -> Timeouts {
        let defaults = Timeouts::default();
        let poll = if self.poll_interval_ms == 0 {
            defaults.poll
        } else {
            Duration::from_millis(self.poll_interval_ms)
        };

        Timeouts {
            arm: Duration::try_from_secs_f64(self.arm_timeout_secs).unwrap_or(defaults.arm),
            join: Duration::try_from_secs_f64(self.join_timeout_secs).unwrap_or(defaults.join),
            poll,
        }
    }
}

fn default_hooks_enabled() -> bool {
    true
}

fn default_timeout_secs() -> f64 {
    10.0
}

fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub monitor: Option<MonitorSettings>,
    pub probes: Option<Vec<ProbeConfig>>,
}

/// A process-liveness probe to register
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ProbeConfig {
    /// Registry name, defaults to the process name
    pub name: Option<String>,
    pub process_name: String,
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub after_feedback_retrieval: bool,
    pub delay_secs: Option<f64>,
    pub max_attempts: Option<usize>,
    pub delay_between_attempts_ms: Option<u64>,
}

impl ProbeConfig {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.process_name)
    }

    pub fn mode(&self) -> ProbeMode {
        if self.blocking {
            ProbeMode::blocking(self.after_feedback_retrieval)
        } else {
            ProbeMode::Polling
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided! ({e})"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
