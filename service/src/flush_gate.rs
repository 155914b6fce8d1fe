use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

/// A reusable barrier that holds back outbound calls while the transport reorganises the group.
/// The gate starts closed.
pub struct FlushGate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl FlushGate {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(false),
            changed: Condvar::new(),
        }
    }

    pub fn open(self: &Self) {
        let mut open = self.open.lock().unwrap();
        *open = true;
        self.changed.notify_all();
    }

    pub fn close(self: &Self) {
        *self.open.lock().unwrap() = false;
    }

    pub fn is_open(self: &Self) -> bool {
        *self.open.lock().unwrap()
    }

    /// Returns true as soon as the gate is open, or false if it stays closed for `timeout`
    pub fn await_open(self: &Self, timeout: Duration) -> bool {
        let open = self.open.lock().unwrap();
        let (open, _) = self
            .changed
            .wait_timeout_while(open, timeout, |open| !*open)
            .unwrap();
        *open
    }
}

impl Default for FlushGate {
    fn default() -> Self {
        Self::new()
    }
}
