//! Probe actors
//!
//! Each registered probe is wrapped in an actor owning a dedicated worker thread.
//! The controller (the fuzzing engine, through the [`Monitor`](crate::Monitor))
//! and the workers only talk through single-slot [`Signal`](signal::Signal)s and
//! the probe's shared status/delay.
//!
//! ```text
//!                    ┌─────────────────────┐
//!                    │ Monitor (engine)    │
//!                    └──────────┬──────────┘
//!              start/stop/join  │  data-ready / armed / release
//!           ┌───────────────────┼────────────────────┐
//!           │                   │                    │
//!   ┌───────▼───────┐   ┌───────▼────────┐   ┌───────▼────────┐
//!   │ ProbeUser     │   │ BlockingProbe- │   │ BlockingProbe- │
//!   │ (poll loop)   │   │ User (handshake│   │ User (after    │
//!   │               │   │  after send)   │   │  feedback)     │
//!   └───────────────┘   └────────────────┘   └────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **ProbeUser**: calls `main()` in a loop, `delay` apart
//! - **BlockingProbeUser**: arms before each send, runs `main()` once released

pub mod blocking;
pub mod probe_user;
pub mod signal;

use std::time::Duration;

use crate::{ProbeStatus, error::MonitorResult, probe::ProbeContext};

use blocking::BlockingProbeUser;
use probe_user::ProbeUser;

/// Waiting budgets shared by the actors of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// How long the controller waits for a blocking probe to arm
    pub arm: Duration,

    /// Join budget: per probe for a single stop, shared by all probes for a bulk stop
    pub join: Duration,

    /// Longest uninterrupted wait; cancellation is checked at least this often
    pub poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            arm: Duration::from_secs(10),
            join: Duration::from_secs(10),
            poll: Duration::from_secs(1),
        }
    }
}

/// How a probe is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    /// `main()` called in a loop, `delay` apart
    #[default]
    Polling,

    /// `main()` called once per send cycle, after the arm/release handshake
    Blocking {
        /// Released by `do_after_timeout` instead of `do_after_sending_data`
        after_feedback_retrieval: bool,
    },
}

impl ProbeMode {
    pub fn blocking(after_feedback_retrieval: bool) -> Self {
        ProbeMode::Blocking {
            after_feedback_retrieval,
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, ProbeMode::Blocking { .. })
    }
}

/// A registered actor, of either kind
#[derive(Debug)]
pub enum ProbeActor {
    Polling(ProbeUser),
    Blocking(BlockingProbeUser),
}

impl ProbeActor {
    pub fn new(probe: Box<dyn crate::Probe>, mode: ProbeMode, timeouts: Timeouts) -> Self {
        match mode {
            ProbeMode::Polling => ProbeActor::Polling(ProbeUser::new(probe, timeouts)),
            ProbeMode::Blocking {
                after_feedback_retrieval,
            } => ProbeActor::Blocking(BlockingProbeUser::new(
                probe,
                after_feedback_retrieval,
                timeouts,
            )),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ProbeActor::Polling(user) => user.name(),
            ProbeActor::Blocking(user) => user.name(),
        }
    }

    pub fn mode(&self) -> ProbeMode {
        match self {
            ProbeActor::Polling(_) => ProbeMode::Polling,
            ProbeActor::Blocking(user) => ProbeMode::blocking(user.after_feedback_retrieval()),
        }
    }

    pub fn as_blocking(&self) -> Option<&BlockingProbeUser> {
        match self {
            ProbeActor::Polling(_) => None,
            ProbeActor::Blocking(user) => Some(user),
        }
    }

    pub fn start(&mut self, ctx: ProbeContext) -> MonitorResult<()> {
        match self {
            ProbeActor::Polling(user) => user.start(ctx),
            ProbeActor::Blocking(user) => user.start(ctx),
        }
    }

    pub fn stop(&self) {
        match self {
            ProbeActor::Polling(user) => user.stop(),
            ProbeActor::Blocking(user) => user.stop(),
        }
    }

    pub fn notify_stop(&self) {
        match self {
            ProbeActor::Polling(user) => user.notify_stop(),
            ProbeActor::Blocking(user) => user.notify_stop(),
        }
    }

    pub fn join(&mut self, timeout: Duration) {
        match self {
            ProbeActor::Polling(user) => user.join(timeout),
            ProbeActor::Blocking(user) => user.join(timeout),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            ProbeActor::Polling(user) => user.is_alive(),
            ProbeActor::Blocking(user) => user.is_alive(),
        }
    }

    pub fn is_stuck(&self) -> bool {
        match self {
            ProbeActor::Polling(user) => user.is_stuck(),
            ProbeActor::Blocking(user) => user.is_stuck(),
        }
    }

    pub fn probe_status(&self) -> ProbeStatus {
        match self {
            ProbeActor::Polling(user) => user.probe_status(),
            ProbeActor::Blocking(user) => user.probe_status(),
        }
    }

    pub fn probe_delay(&self) -> Duration {
        match self {
            ProbeActor::Polling(user) => user.probe_delay(),
            ProbeActor::Blocking(user) => user.probe_delay(),
        }
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        match self {
            ProbeActor::Polling(user) => user.set_probe_delay(delay),
            ProbeActor::Blocking(user) => user.set_probe_delay(delay),
        }
    }

    pub fn configure(&self, args: &[serde_json::Value]) -> MonitorResult<()> {
        match self {
            ProbeActor::Polling(user) => user.configure(args),
            ProbeActor::Blocking(user) => user.configure(args),
        }
    }
}
