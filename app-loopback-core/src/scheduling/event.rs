use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::traits::ready_signal::ReadySignal;

/// Auto-reset event: `set` wakes exactly one waiter, or the next one if
/// nobody is waiting yet.
#[derive(Debug, Default)]
pub struct AutoResetEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }
}

impl ReadySignal for AutoResetEvent {
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            self.cond.wait_while_for(&mut signaled, |s| !*s, timeout);
        }
        std::mem::replace(&mut *signaled, false)
    }
}

/// Manual-reset completion flag: once set, every current and future
/// waiter passes until [`reset`](Self::reset).
#[derive(Debug, Default)]
pub struct CompletionSignal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.done.lock() = false;
    }

    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            self.cond.wait_while_for(&mut done, |d| !*d, timeout);
        }
        *done
    }

    pub fn is_set(&self) -> bool {
        *self.done.lock()
    }
}
