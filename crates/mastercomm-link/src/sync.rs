//! Small blocking primitives built on `parking_lot`.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A lock that may be released by a thread other than the one that took it.
///
/// Passthrough exchanges hold the command lock from the sending thread and
/// hand it to a waiter thread for release.
#[derive(Debug, Default)]
pub(crate) struct HandoffLock {
    locked: Mutex<bool>,
    released: Condvar,
}

impl HandoffLock {
    pub(crate) fn acquire(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.released.wait(&mut locked);
        }
        *locked = true;
    }

    pub(crate) fn release(&self) {
        let mut locked = self.locked.lock();
        *locked = false;
        self.released.notify_one();
    }

    /// Acquire and release when the guard drops.
    pub(crate) fn guard(&self) -> HandoffGuard<'_> {
        self.acquire();
        HandoffGuard { lock: self }
    }
}

pub(crate) struct HandoffGuard<'a> {
    lock: &'a HandoffLock,
}

impl Drop for HandoffGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Manual-reset event.
#[derive(Debug, Default)]
pub(crate) struct Event {
    set: Mutex<bool>,
    changed: Condvar,
}

impl Event {
    pub(crate) fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.changed.notify_all();
    }

    pub(crate) fn clear(&self) {
        *self.set.lock() = false;
    }

    /// Wait until the event is set. Returns `false` on timeout.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        if !*set {
            let _ = self.changed.wait_while_for(&mut set, |set| !*set, timeout);
        }
        *set
    }
}
