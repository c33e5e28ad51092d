//! Probe capability contract
//!
//! A [`Probe`] is user code observing the system under test. The monitor never
//! calls a probe directly: each probe is owned by an actor
//! ([`ProbeUser`](crate::actors::probe_user::ProbeUser) or
//! [`BlockingProbeUser`](crate::actors::blocking::BlockingProbeUser)) which runs
//! its hooks on a dedicated worker thread.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::ProbeStatus;

/// Default delay between two `main()` calls of a polling probe
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(1);

/// Observation routine monitoring the target
///
/// Hooks return `anyhow::Result`; an error (or a panic) terminates the current
/// run of the probe and is logged, it never reaches the engine.
pub trait Probe: Send + 'static {
    /// Registry key. Must be unique among the probes of a monitor.
    fn name(&self) -> &str;

    /// Initial delay between two `main()` calls (polling probes only)
    fn delay(&self) -> Duration {
        DEFAULT_PROBE_DELAY
    }

    /// Probe initialization. May return a first status.
    fn start(&mut self, _ctx: &ProbeContext) -> anyhow::Result<Option<ProbeStatus>> {
        Ok(None)
    }

    fn stop(&mut self, _ctx: &ProbeContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Blocking probes only. Called just before a test input is sent.
    fn arm(&mut self, _ctx: &ProbeContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Observe the target.
    ///
    /// Polling probes get this called in a loop, `delay` apart. Blocking probes get
    /// it called once per send cycle, after being released. A negative code means
    /// something is wrong with the target.
    fn main(&mut self, ctx: &ProbeContext) -> anyhow::Result<ProbeStatus>;

    /// Optional runtime configuration, with whatever arguments fit the probe
    fn configure(&mut self, _args: &[serde_json::Value]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Tone of a console message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    ComponentStart,
    ComponentInfo,
    ComponentStop,
    Error,
}

/// Human-readable status sink (the engine's console)
pub trait Console: Send + Sync {
    fn print_console(&self, level: ConsoleLevel, message: &str);
}

/// Console forwarding everything to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn print_console(&self, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::ComponentStart
            | ConsoleLevel::ComponentInfo
            | ConsoleLevel::ComponentStop => info!("{message}"),
            ConsoleLevel::Error => error!("{message}"),
        }
    }
}

type Opaque = Arc<dyn Any + Send + Sync>;

/// Everything a probe hook gets to see
///
/// The data model and the target belong to the engine; the monitor passes them
/// through untouched.
#[derive(Clone)]
pub struct ProbeContext {
    data_model: Option<Opaque>,
    target: Option<Opaque>,
    console: Arc<dyn Console>,
}

impl ProbeContext {
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self {
            data_model: None,
            target: None,
            console,
        }
    }

    pub fn with_target<T: Any + Send + Sync>(mut self, target: T) -> Self {
        self.target = Some(Arc::new(target));
        self
    }

    pub fn with_data_model<T: Any + Send + Sync>(mut self, data_model: T) -> Self {
        self.data_model = Some(Arc::new(data_model));
        self
    }

    pub(crate) fn set_target(&mut self, target: Opaque) {
        self.target = Some(target);
    }

    pub(crate) fn set_data_model(&mut self, data_model: Opaque) {
        self.data_model = Some(data_model);
    }

    pub(crate) fn set_console(&mut self, console: Arc<dyn Console>) {
        self.console = console;
    }

    /// The target, if one was set and it is a `T`
    pub fn target<T: Any>(&self) -> Option<&T> {
        self.target.as_deref()?.downcast_ref()
    }

    /// The data model, if one was set and it is a `T`
    pub fn data_model<T: Any>(&self) -> Option<&T> {
        self.data_model.as_deref()?.downcast_ref()
    }

    pub fn console(&self) -> &dyn Console {
        self.console.as_ref()
    }
}

impl Default for ProbeContext {
    fn default() -> Self {
        Self::new(Arc::new(TracingConsole))
    }
}

impl fmt::Debug for ProbeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeContext")
            .field("data_model", &self.data_model.is_some())
            .field("target", &self.target.is_some())
            .finish_non_exhaustive()
    }
}
