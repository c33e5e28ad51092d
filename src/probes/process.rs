//! Process liveness probe
//!
//! Watches the PID of a named process on the local host. A vanished process or a
//! changed PID (the target crashed and was restarted) degrades the target.

use std::ffi::OsStr;
use std::thread;
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tracing::{instrument, trace};

use crate::{
    ProbeStatus,
    config::ProbeConfig,
    probe::{ConsoleLevel, Probe, ProbeContext},
};

/// Status codes reported by [`ProcessProbe`]
///
/// `*_AT_START` codes only come from `start()`, all others from `main()`. A
/// successful `start()` reports the PID itself. `NOT_FOUND_AT_START` and
/// `PID_CHANGED` share a value, the status timestamp and `info` tell them apart.
pub mod codes {
    pub const OK: i64 = 0;
    pub const PID_CHANGED: i64 = -1;
    pub const NOT_RUNNING: i64 = -2;
    pub const NOT_FOUND_AT_START: i64 = -1;
    pub const MULTIPLE_AT_START: i64 = -10;
    /// Soft signal: the lookup was ambiguous, nothing can be said about the target
    pub const MULTIPLE_PIDS: i64 = 10;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidLookup {
    Single(u32),
    Multiple(Vec<u32>),
    NotFound,
}

pub struct ProcessProbe {
    name: String,
    process_name: String,
    delay: Duration,
    max_attempts: usize,
    delay_between_attempts: Duration,
    saved_pid: Option<u32>,
    system: System,
}

impl ProcessProbe {
    pub fn new(process_name: impl Into<String>) -> Self {
        let process_name = process_name.into();

        Self {
            name: process_name.clone(),
            process_name,
            delay: Duration::from_millis(500),
            max_attempts: 10,
            delay_between_attempts: Duration::from_millis(100),
            saved_pid: None,
            system: System::new(),
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        let mut probe = Self::new(config.process_name.clone()).with_name(config.name());

        if let Some(delay) = config
            .delay_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            probe.delay = delay;
        }
        if let Some(max_attempts) = config.max_attempts {
            probe.max_attempts = max_attempts.max(1);
        }
        if let Some(ms) = config.delay_between_attempts_ms {
            probe.delay_between_attempts = Duration::from_millis(ms);
        }

        probe
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_attempts(mut self, max_attempts: usize, delay_between_attempts: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.delay_between_attempts = delay_between_attempts;
        self
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn saved_pid(&self) -> Option<u32> {
        self.saved_pid
    }

    pub fn lookup(&mut self) -> PidLookup {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let mut pids: Vec<u32> = self
            .system
            .processes_by_exact_name(OsStr::new(&self.process_name))
            .map(|process| process.pid().as_u32())
            .collect();
        pids.sort_unstable();
        trace!(process = %self.process_name, ?pids, "pid lookup");

        match pids.len() {
            0 => PidLookup::NotFound,
            1 => PidLookup::Single(pids[0]),
            _ => PidLookup::Multiple(pids),
        }
    }
}

impl Probe for ProcessProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn delay(&self) -> Duration {
        self.delay
    }

    fn start(&mut self, ctx: &ProbeContext) -> anyhow::Result<Option<ProbeStatus>> {
        let (code, msg) = match self.lookup() {
            PidLookup::Single(pid) => {
                self.saved_pid = Some(pid);
                (
                    i64::from(pid),
                    format!("*** INIT: '{}' current PID: {pid} ***", self.process_name),
                )
            }
            PidLookup::Multiple(_) => {
                self.saved_pid = None;
                (
                    codes::MULTIPLE_AT_START,
                    "*** INIT ERROR: unable to retrieve process PID ***".to_string(),
                )
            }
            PidLookup::NotFound => {
                self.saved_pid = None;
                (
                    codes::NOT_FOUND_AT_START,
                    "*** INIT ERROR: unable to retrieve process PID ***".to_string(),
                )
            }
        };

        ctx.console().print_console(ConsoleLevel::ComponentInfo, &msg);
        Ok(Some(ProbeStatus::new(Some(code)).with_info(msg)))
    }

    /// Waits `delay` for the target to settle, then retries the lookup while the
    /// process is not found.
    #[instrument(skip_all, fields(process = %self.process_name))]
    fn main(&mut self, ctx: &ProbeContext) -> anyhow::Result<ProbeStatus> {
        thread::sleep(self.delay);

        let mut lookup = PidLookup::NotFound;
        for _ in 0..self.max_attempts {
            thread::sleep(self.delay_between_attempts);
            lookup = self.lookup();
            if lookup != PidLookup::NotFound {
                break;
            }
        }

        let status = match lookup {
            PidLookup::Multiple(pids) => {
                ctx.console().print_console(
                    ConsoleLevel::Error,
                    &format!(
                        "*** ERROR: more than one PID detected for process name '{}' --> {pids:?}",
                        self.process_name
                    ),
                );
                ProbeStatus::new(Some(codes::MULTIPLE_PIDS))
                    .with_info("ERROR: more than one PID detected")
            }
            PidLookup::NotFound => ProbeStatus::new(Some(codes::NOT_RUNNING))
                .with_info(format!("'{}' is not running anymore!", self.process_name)),
            PidLookup::Single(pid) if self.saved_pid != Some(pid) => {
                self.saved_pid = Some(pid);
                ProbeStatus::new(Some(codes::PID_CHANGED)).with_info(format!(
                    "'{}' PID({pid}) has changed!",
                    self.process_name
                ))
            }
            PidLookup::Single(_) => ProbeStatus::new(Some(codes::OK)),
        };

        Ok(status)
    }

    /// Accepts a new process name as first argument
    fn configure(&mut self, args: &[serde_json::Value]) -> anyhow::Result<()> {
        match args.first() {
            Some(serde_json::Value::String(process_name)) => {
                self.process_name = process_name.clone();
                self.saved_pid = None;
                Ok(())
            }
            Some(other) => anyhow::bail!("expected a process name, got {other}"),
            None => Ok(()),
        }
    }
}
