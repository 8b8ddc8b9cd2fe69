//! Single-shot completion signals.
//!
//! A [`Signal`] is a write-once cell any number of consumers may await. The
//! whole stage protocol hangs off these: a downstream project's chain blocks
//! on its upstream's signal, and the mutex release inside `complete` is the
//! happens-before edge that makes the shared classpath map safe to read on
//! the other side.

use std::sync::{Condvar, Mutex};

pub struct Signal<T> {
    cell: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Self {
        Self {
            cell: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Completes the signal and wakes every waiter.
    ///
    /// Returns whether this call won; a signal completes at most once and
    /// later calls are ignored. Callers that must not double-complete check
    /// the return value.
    pub fn complete(&self, value: T) -> bool {
        let mut cell = self.cell.lock().unwrap();
        if cell.is_some() {
            return false;
        }
        *cell = Some(value);
        self.ready.notify_all();
        true
    }

    /// Blocks until the signal is completed, then returns a copy.
    pub fn wait(&self) -> T {
        let mut cell = self.cell.lock().unwrap();
        while cell.is_none() {
            cell = self.ready.wait(cell).unwrap();
        }
        cell.as_ref().cloned().unwrap()
    }

    /// Non-blocking read of the current state.
    pub fn peek(&self) -> Option<T> {
        self.cell.lock().unwrap().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.cell.lock().unwrap().is_some()
    }
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}
