//! BlockingProbeUser - probe synchronized with data transmission
//!
//! Instead of polling, the worker goes through a handshake with the controller
//! on every send cycle:
//!
//! ```text
//!   controller                          worker
//!   ──────────                          ──────
//!   notify_data_ready() ───────────▶ 1. wait for data-ready
//!                                    2. probe.arm()
//!   wait_until_armed()  ◀─────────── 3. signal armed, wait for release
//!   (send test input)
//!   notify_blocking()   ───────────▶ 4. probe.main(), back to 1
//!   notify_error()      ───────────▶    (cycle aborted, back to 1 without main)
//! ```
//!
//! Every wait is split into poll intervals so cancellation is observed promptly.
//! Releases are not queued: a signal fired while nobody waits is only seen by
//! the next wait.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use crate::{
    ProbeStatus,
    error::{MonitorError, MonitorResult},
    probe::{Probe, ProbeContext},
};

use super::{
    Timeouts,
    probe_user::{ActorCore, Phase, ProbeUser},
    signal::Signal,
};

/// Signals exchanged between the controller and a blocking worker
#[derive(Debug, Default)]
pub(crate) struct Handshake {
    data_ready: Signal,
    armed: Signal,
    blocking: Signal,
    error: Signal,
}

impl Handshake {
    fn clear(&self) {
        self.data_ready.clear();
        self.armed.clear();
        self.blocking.clear();
        self.error.clear();
    }

    /// Phase 1. Returns `false` if cancellation came first.
    fn wait_for_data_ready(&self, core: &ActorCore) -> bool {
        while !self.data_ready.is_set() {
            if !core.go_on() {
                return false;
            }
            self.data_ready.wait_timeout(core.timeouts.poll);
        }

        self.data_ready.clear();
        true
    }

    /// Phase 3. Returns `true` on a normal release, `false` when the cycle is
    /// aborted by an error release or cancellation.
    fn wait_for_release(&self, core: &ActorCore) -> bool {
        let mut released = true;

        while !self.blocking.is_set() {
            if self.error.is_set() || !core.go_on() {
                self.error.clear();
                released = false;
                break;
            }
            self.blocking.wait_timeout(core.timeouts.poll);
        }

        self.blocking.clear();
        released
    }
}

/// How a wait for the armed signal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed,
    /// Arm budget spent, the actor was asked to stop
    TimedOut,
    /// Not running, or cancelled while waiting
    Gone,
}

/// Actor owning one blocking probe and its worker thread
pub struct BlockingProbeUser {
    user: ProbeUser,
    handshake: Arc<Handshake>,
    after_feedback_retrieval: bool,
}

impl BlockingProbeUser {
    pub fn new(probe: Box<dyn Probe>, after_feedback_retrieval: bool, timeouts: Timeouts) -> Self {
        Self {
            user: ProbeUser::new(probe, timeouts),
            handshake: Default::default(),
            after_feedback_retrieval,
        }
    }

    pub fn name(&self) -> &str {
        self.user.name()
    }

    /// Whether the probe is released after the feedback window
    /// ([`Monitor::do_after_timeout`](crate::Monitor::do_after_timeout)) rather than
    /// right after sending.
    pub fn after_feedback_retrieval(&self) -> bool {
        self.after_feedback_retrieval
    }

    pub fn start(&mut self, ctx: ProbeContext) -> MonitorResult<()> {
        if self.user.is_alive() {
            return Err(MonitorError::AlreadyRunning(self.name().to_string()));
        }

        self.handshake.clear();
        let handshake = self.handshake.clone();
        self.user
            .launch(ctx, move |core, ctx| run_blocking(core, &handshake, ctx))
    }

    /// Request cancellation and wake a worker waiting for its release
    pub fn stop(&self) {
        self.user.stop();
        self.notify_error();
    }

    pub fn notify_stop(&self) {
        self.user.notify_stop();
    }

    pub fn join(&mut self, timeout: Duration) {
        self.user.join(timeout);
    }

    pub fn is_alive(&self) -> bool {
        self.user.is_alive()
    }

    pub fn is_stuck(&self) -> bool {
        self.user.is_stuck()
    }

    pub fn probe_status(&self) -> ProbeStatus {
        self.user.probe_status()
    }

    pub fn probe_delay(&self) -> Duration {
        self.user.probe_delay()
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        self.user.set_probe_delay(delay);
    }

    pub fn configure(&self, args: &[serde_json::Value]) -> MonitorResult<()> {
        self.user.configure(args)
    }

    pub fn notify_data_ready(&self) {
        self.handshake.data_ready.set();
    }

    /// Normal release: the test input has been sent
    pub fn notify_blocking(&self) {
        self.handshake.blocking.set();
    }

    /// Error release: the send did not happen as expected
    pub fn notify_error(&self) {
        self.handshake.error.set();
    }

    /// Block until the worker reports armed, dies, or is cancelled.
    ///
    /// A worker still not armed once the arm budget is spent is asked to stop.
    pub fn wait_until_armed(&self) -> ArmOutcome {
        let timeouts = &self.user.core().timeouts;
        let deadline = Instant::now() + timeouts.arm;
        let mut timed_out = false;

        while !self.handshake.armed.is_set() {
            if !timed_out && Instant::now() >= deadline {
                warn!(probe = %self.name(), "probe not armed in time, requesting stop");
                self.stop();
                timed_out = true;
            }
            if !self.is_alive() || self.user.is_stop_requested() {
                break;
            }
            self.handshake.armed.wait_timeout(timeouts.poll);
        }

        let outcome = if self.handshake.armed.is_set() {
            ArmOutcome::Armed
        } else if timed_out {
            ArmOutcome::TimedOut
        } else {
            ArmOutcome::Gone
        };

        self.handshake.armed.clear();
        outcome
    }
}

impl fmt::Debug for BlockingProbeUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingProbeUser")
            .field("name", &self.name())
            .field("alive", &self.is_alive())
            .field("after_feedback_retrieval", &self.after_feedback_retrieval)
            .finish()
    }
}

#[instrument(skip_all, fields(probe = %core.name))]
fn run_blocking(core: &ActorCore, handshake: &Handshake, ctx: &ProbeContext) {
    if !core.run_start(ctx) {
        return;
    }

    while core.go_on() {
        if !handshake.wait_for_data_ready(core) {
            continue;
        }

        let armed = core
            .invoke(Phase::Arm, ctx, |probe, ctx| probe.arm(ctx))
            .is_some();
        // always answer, the controller is waiting on it
        handshake.armed.set();
        if !armed {
            return;
        }
        trace!("armed");

        if !handshake.wait_for_release(core) {
            trace!("cycle aborted before main()");
            continue;
        }

        let Some(status) = core.invoke(Phase::Main, ctx, |probe, ctx| probe.main(ctx)) else {
            return;
        };
        core.set_status(status);
    }

    core.run_stop(ctx);
    debug!("blocking probe loop finished");
}
