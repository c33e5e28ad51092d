//! ProbeUser - runs a polling probe on its own worker thread
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Starting ──probe.start() ok──▶ Looping ──stop()──▶ Stopping ──▶ Idle
//!                       │                            │ main() / sleep(delay)
//!                       └── start() failed ──────────┴── main() failed ─────────────▶ Idle
//! ```
//!
//! A fresh thread is spawned on every `start()`; the actor itself is restartable.
//! Nothing a probe does (error or panic) ever crosses into the controller thread:
//! every hook runs through [`ActorCore::invoke`], which logs the failure and ends
//! the current run.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, trace};

use crate::{
    ProbeStatus,
    error::{MonitorError, MonitorResult},
    probe::{ConsoleLevel, Probe, ProbeContext},
};

use super::{Timeouts, signal::Signal};

/// Longest sleep between two attempts at the probe lock
const LOCK_RETRY: Duration = Duration::from_millis(10);

/// Probe hook being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Arm,
    Main,
    Stop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Start => "start()",
            Phase::Arm => "arm()",
            Phase::Main => "main()",
            Phase::Stop => "stop()",
        };
        write!(f, "during {name}")
    }
}

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between an actor handle and its worker thread
pub(crate) struct ActorCore {
    pub(crate) name: String,
    pub(crate) timeouts: Timeouts,
    probe: Mutex<Box<dyn Probe>>,
    status: Mutex<ProbeStatus>,
    delay: Mutex<Duration>,
    /// Cooperative cancellation
    stop: Signal,
    /// Set by the worker right before it returns, whatever the reason
    exited: Signal,
}

impl ActorCore {
    fn new(probe: Box<dyn Probe>, timeouts: Timeouts) -> Self {
        Self {
            name: probe.name().to_string(),
            delay: Mutex::new(probe.delay()),
            probe: Mutex::new(probe),
            status: Mutex::new(ProbeStatus::default()),
            timeouts,
            stop: Signal::new(),
            exited: Signal::new(),
        }
    }

    pub(crate) fn go_on(&self) -> bool {
        !self.stop.is_set()
    }

    pub(crate) fn status(&self) -> ProbeStatus {
        lock(&self.status).clone()
    }

    pub(crate) fn set_status(&self, status: ProbeStatus) {
        trace!(code = ?status.code, "probe status updated");
        *lock(&self.status) = status;
    }

    pub(crate) fn delay(&self) -> Duration {
        *lock(&self.delay)
    }

    /// Run one probe hook, turning any error or panic into a logged failure.
    ///
    /// Returns `None` when the hook failed; the caller must then end the run.
    pub(crate) fn invoke<T>(
        &self,
        phase: Phase,
        ctx: &ProbeContext,
        hook: impl FnOnce(&mut dyn Probe, &ProbeContext) -> anyhow::Result<T>,
    ) -> Option<T> {
        trace!("calling probe hook {phase}");

        let outcome = {
            let mut probe = lock(&self.probe);
            panic::catch_unwind(AssertUnwindSafe(|| hook(&mut **probe, ctx)))
        };

        match outcome {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.report_failure(phase, ctx, &format!("{e:?}"));
                None
            }
            Err(payload) => {
                self.report_failure(phase, ctx, &panic_message(payload.as_ref()));
                None
            }
        }
    }

    fn report_failure(&self, phase: Phase, ctx: &ProbeContext, details: &str) {
        error!(%phase, "exception in probe '{}': {}", self.name, details);

        let separator = "-".repeat(60);
        ctx.console().print_console(
            ConsoleLevel::Error,
            &format!(
                "Exception in probe '{}' ({phase}):\n{separator}\n{details}\n{separator}",
                self.name
            ),
        );
    }

    /// Announce and run `probe.start()`. Returns whether the probe is running.
    pub(crate) fn run_start(&self, ctx: &ProbeContext) -> bool {
        ctx.console().print_console(
            ConsoleLevel::ComponentInfo,
            &format!("__ probe '{}' is starting __", self.name),
        );

        match self.invoke(Phase::Start, ctx, |probe, ctx| probe.start(ctx)) {
            Some(Some(status)) => {
                self.set_status(status);
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    pub(crate) fn run_stop(&self, ctx: &ProbeContext) {
        ctx.console().print_console(
            ConsoleLevel::ComponentInfo,
            &format!("__ probe '{}' is stopping __", self.name),
        );

        self.invoke(Phase::Stop, ctx, |probe, ctx| probe.stop(ctx));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked with a non-string payload".to_string()
    }
}

/// Marks the worker as exited when dropped, including on unwinding
struct ExitGuard<'a>(&'a Signal);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// Actor owning one polling probe and its worker thread
pub struct ProbeUser {
    core: Arc<ActorCore>,
    thread: Option<JoinHandle<()>>,
}

impl ProbeUser {
    pub fn new(probe: Box<dyn Probe>, timeouts: Timeouts) -> Self {
        Self {
            core: Arc::new(ActorCore::new(probe, timeouts)),
            thread: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub(crate) fn core(&self) -> &Arc<ActorCore> {
        &self.core
    }

    /// Spawn the worker running the plain poll loop
    ///
    /// Fails if the worker from a previous `start()` is still alive.
    pub fn start(&mut self, ctx: ProbeContext) -> MonitorResult<()> {
        self.launch(ctx, run_polling)
    }

    /// Spawn a fresh worker thread executing `body`
    pub(crate) fn launch<F>(&mut self, ctx: ProbeContext, body: F) -> MonitorResult<()>
    where
        F: FnOnce(&ActorCore, &ProbeContext) + Send + 'static,
    {
        if self.is_alive() {
            return Err(MonitorError::AlreadyRunning(self.core.name.clone()));
        }

        // previous worker is done, reap it before replacing the handle
        if let Some(previous) = self.thread.take() {
            let _ = previous.join();
        }

        self.core.stop.clear();
        self.core.exited.clear();

        let core = self.core.clone();
        let handle = thread::Builder::new()
            .name(self.core.name.clone())
            .spawn(move || {
                let _exit = ExitGuard(&core.exited);
                body(&core, &ctx);
            })?;

        debug!(probe = %self.core.name, "worker spawned");
        self.thread = Some(handle);
        Ok(())
    }

    /// Request cancellation. Never blocks.
    pub fn stop(&self) {
        self.core.stop.set();
    }

    /// Called once the controller has seen the worker terminate, so the actor
    /// can be started again.
    pub fn notify_stop(&self) {
        self.core.stop.clear();
    }

    pub fn is_stop_requested(&self) -> bool {
        !self.core.go_on()
    }

    /// Wait up to `timeout` for the worker to exit. No-op if it is not alive.
    pub fn join(&mut self, timeout: Duration) {
        if !self.is_alive() {
            return;
        }

        if self.core.exited.wait_timeout(timeout) {
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
            && !self.core.exited.is_set()
    }

    /// Alive although cancellation was requested: a hook is not returning
    pub fn is_stuck(&self) -> bool {
        self.is_alive() && self.is_stop_requested()
    }

    pub fn probe_status(&self) -> ProbeStatus {
        self.core.status()
    }

    pub fn probe_delay(&self) -> Duration {
        self.core.delay()
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *lock(&self.core.delay) = delay;
    }

    /// Forward configuration arguments to the probe
    ///
    /// Runs on the caller's thread, between two hook calls of the worker. Gives up
    /// after the join budget if a hook does not return.
    pub fn configure(&self, args: &[serde_json::Value]) -> MonitorResult<()> {
        let outcome = {
            let mut probe = self.lock_probe(self.core.timeouts.join)?;
            panic::catch_unwind(AssertUnwindSafe(|| probe.configure(args)))
        };

        let reason = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("{e:#}"),
            Err(payload) => panic_message(payload.as_ref()),
        };

        Err(MonitorError::Configure {
            probe: self.core.name.clone(),
            reason,
        })
    }
}

impl ProbeUser {
    /// Take the probe lock, waiting at most `timeout` for the worker to leave its
    /// current hook
    fn lock_probe(&self, timeout: Duration) -> MonitorResult<MutexGuard<'_, Box<dyn Probe>>> {
        let deadline = Instant::now() + timeout;
        let step = self.core.timeouts.poll.min(LOCK_RETRY);

        loop {
            match self.core.probe.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MonitorError::Busy(self.core.name.clone()));
            }
            thread::sleep(remaining.min(step));
        }
    }
}

impl fmt::Debug for ProbeUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeUser")
            .field("name", &self.core.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[instrument(skip_all, fields(probe = %core.name))]
fn run_polling(core: &ActorCore, ctx: &ProbeContext) {
    if !core.run_start(ctx) {
        return;
    }

    while core.go_on() {
        let Some(status) = core.invoke(Phase::Main, ctx, |probe, ctx| probe.main(ctx)) else {
            return;
        };
        core.set_status(status);

        // woken early by stop()
        core.stop.wait_timeout(core.delay());
    }

    core.run_stop(ctx);
    debug!("probe loop finished");
}
