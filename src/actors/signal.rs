//! Single-slot binary signal shared between the controller and a worker thread
//!
//! A [`Signal`] is a flag plus a condition variable. Setting it twice is the same
//! as setting it once: nothing is queued. Waiters always wake on `set`; callers
//! decide whether to consume the flag with [`Signal::clear`].

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        *self.lock() = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Block until the signal is set or `timeout` elapses.
    ///
    /// Returns the state of the flag on wake-up.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
