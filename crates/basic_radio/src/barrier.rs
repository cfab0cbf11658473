//! A light wrapper around a mutex and condition variable.
//! It is used for inter-thread communication for workload synchronisation:
//! the ingest thread signals work to the channel workers through one
//! barrier and waits for completion on another.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Possible errors when using a barrier.
#[derive(Debug, PartialEq, Eq)]
pub enum BarrierError {
    /// Barrier is closed.
    Closed,
}

struct BarrierState<T> {
    data: T,
    is_closed: bool,
}

pub struct Barrier<T> {
    state: Mutex<BarrierState<T>>,
    on_change: Condvar,
}

impl<T> Barrier<T> {
    pub fn new(initial_data: T) -> Self {
        Self {
            state: Mutex::new(BarrierState { data: initial_data, is_closed: false }),
            on_change: Condvar::new(),
        }
    }

    /// Close the barrier. Threads waiting on it get a Closed error.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.is_closed = true;
        self.on_change.notify_all();
    }

    /// Updates the barrier with a new value and notifies all waiting threads.
    pub fn set(&self, new_data: T) -> Result<(), BarrierError> {
        let mut state = self.state.lock().unwrap();
        if state.is_closed {
            return Err(BarrierError::Closed);
        }
        state.data = new_data;
        self.on_change.notify_all();
        Ok(())
    }

    /// Blocks the thread until the predicate is satisfied.
    pub fn wait(&self, predicate: impl Fn(&T) -> bool) -> Result<(), BarrierError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.is_closed {
                return Err(BarrierError::Closed);
            }
            if predicate(&state.data) {
                return Ok(());
            }
            state = self.on_change.wait(state).unwrap();
        }
    }

    /// Blocks until the predicate is satisfied or the timeout elapses.
    /// Returns true when the predicate was satisfied in time.
    pub fn wait_timeout(&self, predicate: impl Fn(&T) -> bool, timeout: Duration) -> Result<bool, BarrierError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.is_closed {
                return Err(BarrierError::Closed);
            }
            if predicate(&state.data) {
                return Ok(true);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (next_state, wait_result) = self.on_change.wait_timeout(state, deadline - now).unwrap();
            state = next_state;
            if wait_result.timed_out() && !predicate(&state.data) && !state.is_closed {
                return Ok(false);
            }
        }
    }
}
