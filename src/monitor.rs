//! Monitor - registry of probe actors and send-cycle orchestrator
//!
//! ## Send cycle, seen from the engine
//!
//! ```text
//! do_before_sending_data()   reset target status, data-ready → every blocking probe,
//!                            wait until each one is armed
//! (send test input)
//! do_after_sending_data()    release blocking probes with after_feedback_retrieval = false
//! (feedback window)
//! do_after_timeout()         release blocking probes with after_feedback_retrieval = true
//! target_status()            aggregate of the live probes' latest statuses
//!
//! do_on_error()              on failure: error-release every blocking probe
//! ```
//!
//! Nothing a probe does is raised to the engine. Failures end up in the logs,
//! in the [`ErrorSink`], or as a `false` return value.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use crate::{
    ProbeStatus, TargetStatus,
    actors::{ProbeActor, ProbeMode, Timeouts, blocking::{ArmOutcome, BlockingProbeUser}},
    config::MonitorSettings,
    error::{ErrorSink, MonitorError, MonitorResult, OperationalError, TracingErrorSink},
    probe::{Console, ConsoleLevel, Probe, ProbeContext, TracingConsole},
};

pub struct Monitor {
    probe_users: HashMap<String, ProbeActor>,
    hooks_enabled: bool,
    /// Cached until the next `do_before_sending_data`
    target_status: Option<TargetStatus>,
    timeouts: Timeouts,
    context: ProbeContext,
    console: Arc<dyn Console>,
    error_sink: Arc<dyn ErrorSink>,
}

impl Monitor {
    pub fn new(settings: &MonitorSettings) -> Self {
        let console: Arc<dyn Console> = Arc::new(TracingConsole);

        Self {
            probe_users: HashMap::new(),
            hooks_enabled: settings.hooks_enabled,
            target_status: None,
            timeouts: settings.timeouts(),
            context: ProbeContext::new(console.clone()),
            console,
            error_sink: Arc::new(TracingErrorSink),
        }
    }

    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        self.context.set_console(console.clone());
        self.console = console;
        self
    }

    pub fn with_error_sink(mut self, error_sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = error_sink;
        self
    }

    /// Target handed to probes started from now on
    pub fn set_target<T: Any + Send + Sync>(&mut self, target: T) {
        self.context.set_target(Arc::new(target));
    }

    /// Data model handed to probes started from now on
    pub fn set_data_model<T: Any + Send + Sync>(&mut self, data_model: T) {
        self.context.set_data_model(Arc::new(data_model));
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Register a probe under its name.
    ///
    /// No thread is created until the probe is started.
    pub fn add_probe<P: Probe>(&mut self, probe: P, mode: ProbeMode) -> MonitorResult<()> {
        self.add_boxed_probe(Box::new(probe), mode)
    }

    pub fn add_boxed_probe(&mut self, probe: Box<dyn Probe>, mode: ProbeMode) -> MonitorResult<()> {
        let name = probe.name().to_string();
        if self.probe_users.contains_key(&name) {
            return Err(MonitorError::AlreadyExistingProbe(name));
        }

        debug!(probe = %name, ?mode, "registering probe");
        self.probe_users
            .insert(name, ProbeActor::new(probe, mode, self.timeouts));
        Ok(())
    }

    pub fn start(&self) {
        self.console
            .print_console(ConsoleLevel::ComponentStart, "*** Monitor is started ***");
    }

    pub fn stop(&mut self) {
        self.console.print_console(
            ConsoleLevel::ComponentInfo,
            "*** Monitor stopping in progress... ***",
        );
        self.stop_all_probes();
        self.console
            .print_console(ConsoleLevel::ComponentStop, "*** Monitor is stopped ***");
    }

    pub fn enable_hooks(&mut self) {
        self.hooks_enabled = true;
    }

    pub fn disable_hooks(&mut self) {
        self.hooks_enabled = false;
    }

    pub fn hooks_enabled(&self) -> bool {
        self.hooks_enabled
    }

    fn actor(&self, name: &str) -> MonitorResult<&ProbeActor> {
        self.probe_users
            .get(name)
            .ok_or_else(|| MonitorError::UnknownProbe(name.to_string()))
    }

    fn report(&self, error: OperationalError) {
        self.error_sink.set_error(error);
    }

    pub fn configure_probe(&self, name: &str, args: &[serde_json::Value]) -> bool {
        let result = self.actor(name).and_then(|actor| actor.configure(args));

        match result {
            Ok(()) => true,
            Err(MonitorError::UnknownProbe(_)) => {
                self.report(OperationalError::unknown_probe(name));
                false
            }
            Err(MonitorError::Busy(_)) => {
                self.report(OperationalError::busy_probe(name));
                false
            }
            Err(e) => {
                warn!(probe = %name, "{e}");
                false
            }
        }
    }

    pub fn start_probe(&mut self, name: &str) -> bool {
        let ctx = self.context.clone();
        let Some(actor) = self.probe_users.get_mut(name) else {
            self.report(OperationalError::unknown_probe(name));
            return false;
        };

        match actor.start(ctx) {
            Ok(()) => true,
            Err(e) => {
                warn!(probe = %name, "failed to start probe: {e}");
                false
            }
        }
    }

    /// Start every registered probe. Returns whether all of them started.
    pub fn start_all_probes(&mut self) -> bool {
        let names = self.get_probes_names();
        names
            .iter()
            .fold(true, |all, name| self.start_probe(name) && all)
    }

    /// Stop one probe and wait for it, up to the join budget
    pub fn stop_probe(&mut self, name: &str) -> bool {
        let timeout = self.timeouts.join;
        let Some(actor) = self.probe_users.get_mut(name) else {
            self.report(OperationalError::unknown_probe(name));
            return false;
        };

        actor.stop();
        actor.join(timeout);

        if actor.is_alive() {
            self.report(OperationalError::stuck_probe(name));
            false
        } else {
            actor.notify_stop();
            true
        }
    }

    /// Stop every probe, sharing one join budget across all of them
    #[instrument(skip(self))]
    pub fn stop_all_probes(&mut self) {
        for actor in self.probe_users.values() {
            actor.stop();
        }

        let deadline = Instant::now() + self.timeouts.join;
        for (name, actor) in self.probe_users.iter_mut() {
            actor.join(deadline.saturating_duration_since(Instant::now()));

            if actor.is_alive() {
                self.error_sink.set_error(OperationalError::stuck_probe(name));
            } else {
                actor.notify_stop();
                trace!(probe = %name, "probe stopped");
            }
        }
    }

    pub fn get_probe_status(&self, name: &str) -> MonitorResult<ProbeStatus> {
        self.actor(name).map(ProbeActor::probe_status)
    }

    pub fn get_probe_delay(&self, name: &str) -> MonitorResult<Duration> {
        self.actor(name).map(ProbeActor::probe_delay)
    }

    pub fn set_probe_delay(&self, name: &str, delay: Duration) -> MonitorResult<()> {
        self.actor(name)
            .map(|actor| actor.set_probe_delay(delay))
    }

    pub fn is_probe_launched(&self, name: &str) -> MonitorResult<bool> {
        self.actor(name).map(ProbeActor::is_alive)
    }

    pub fn is_probe_stuck(&self, name: &str) -> MonitorResult<bool> {
        self.actor(name).map(ProbeActor::is_stuck)
    }

    pub fn probe_mode(&self, name: &str) -> MonitorResult<ProbeMode> {
        self.actor(name).map(ProbeActor::mode)
    }

    pub fn is_blocking(&self, name: &str) -> MonitorResult<bool> {
        self.probe_mode(name).map(|mode| mode.is_blocking())
    }

    /// Registered names, sorted
    pub fn get_probes_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.probe_users.keys().cloned().collect();
        names.sort();
        names
    }

    fn blocking_users(&self) -> impl Iterator<Item = &BlockingProbeUser> {
        self.probe_users.values().filter_map(ProbeActor::as_blocking)
    }

    /// Arm every blocking probe and wait until each one is armed
    #[instrument(skip(self))]
    pub fn do_before_sending_data(&mut self) {
        if !self.hooks_enabled {
            return;
        }

        self.target_status = None;

        for user in self.blocking_users() {
            user.notify_data_ready();
        }

        for user in self.blocking_users() {
            match user.wait_until_armed() {
                ArmOutcome::Armed => {}
                ArmOutcome::TimedOut => self.report(OperationalError::arm_timeout(user.name())),
                ArmOutcome::Gone => trace!(probe = %user.name(), "probe not running, not armed"),
            }
        }
    }

    /// Release the blocking probes observing right after the send
    pub fn do_after_sending_data(&self) {
        if !self.hooks_enabled {
            return;
        }

        for user in self
            .blocking_users()
            .filter(|user| !user.after_feedback_retrieval())
        {
            user.notify_blocking();
        }
    }

    /// Interactive-session variant: whether the target is still fine
    pub fn do_after_sending_and_logging_data(&mut self) -> bool {
        if !self.hooks_enabled {
            return true;
        }

        self.is_target_ok()
    }

    /// Release the blocking probes observing after the feedback window
    pub fn do_after_timeout(&self) {
        if !self.hooks_enabled {
            return;
        }

        for user in self
            .blocking_users()
            .filter(|user| user.after_feedback_retrieval())
        {
            user.notify_blocking();
        }
    }

    /// Abort the current cycle of every blocking probe
    pub fn do_on_error(&self) {
        if !self.hooks_enabled {
            return;
        }

        for user in self.blocking_users() {
            user.notify_error();
        }
    }

    /// Aggregate status of the live probes, computed once per send cycle
    pub fn target_status(&mut self) -> TargetStatus {
        if let Some(status) = self.target_status {
            return status;
        }

        let statuses: Vec<ProbeStatus> = self
            .probe_users
            .values()
            .filter(|actor| actor.is_alive())
            .map(ProbeActor::probe_status)
            .collect();

        let status = TargetStatus::aggregate(&statuses);
        trace!(?status, probes = statuses.len(), "target status computed");
        self.target_status = Some(status);
        status
    }

    pub fn is_target_ok(&mut self) -> bool {
        self.target_status().is_ok()
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(&MonitorSettings::default())
    }
}
