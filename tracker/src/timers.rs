//! Named wall-clock timers with suspend/resume.
//!
//! A timer is either running (present in the set) or stopped (absent).
//! `freeze` banks the elapsed time of every running timer when the host goes
//! inactive; `thaw` restarts counting from the moment the host is back, so
//! background time is never charged.

use std::collections::HashMap;

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    start_ms: i64,
    accumulated_ms: i64,
}

/// Set of running timers keyed by name.
pub struct TimerSet {
    clock: SharedClock,
    timers: HashMap<String, TimerEntry>,
    frozen: bool,
}

impl TimerSet {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            timers: HashMap::new(),
            frozen: false,
        }
    }

    /// Start `name` unless it is already running.
    pub fn start(&mut self, name: &str) {
        if self.timers.contains_key(name) {
            return;
        }
        let now = self.clock.now_ms();
        self.timers.insert(
            name.to_string(),
            TimerEntry {
                start_ms: now,
                accumulated_ms: 0,
            },
        );
    }

    /// Read and reset: returns the elapsed time and starts `name` again from
    /// zero. Works on stopped timers too (returns 0 and starts it).
    pub fn restart(&mut self, name: &str) -> i64 {
        let duration = self.stop(name);
        self.start(name);
        duration
    }

    /// Elapsed time of `name`, or 0 when it is not running.
    pub fn get(&self, name: &str) -> i64 {
        self.timers
            .get(name)
            .map(|entry| self.elapsed(entry))
            .unwrap_or(0)
    }

    /// Stop `name` and return its elapsed time. The next `start` begins
    /// from zero.
    pub fn stop(&mut self, name: &str) -> i64 {
        match self.timers.remove(name) {
            Some(entry) => self.elapsed(&entry),
            None => 0,
        }
    }

    /// Bank the running time of every timer. Idempotent while frozen.
    pub fn freeze(&mut self) {
        if self.frozen {
            return;
        }
        let now = self.clock.now_ms();
        for entry in self.timers.values_mut() {
            entry.accumulated_ms += now - entry.start_ms;
            entry.start_ms = now;
        }
        self.frozen = true;
    }

    /// Resume counting every timer from now.
    pub fn thaw(&mut self) {
        let now = self.clock.now_ms();
        for entry in self.timers.values_mut() {
            entry.start_ms = now;
        }
        self.frozen = false;
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Names of the running timers, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.timers.keys().cloned().collect();
        names.sort();
        names
    }

    fn elapsed(&self, entry: &TimerEntry) -> i64 {
        if self.frozen {
            entry.accumulated_ms
        } else {
            (self.clock.now_ms() - entry.start_ms) + entry.accumulated_ms
        }
    }
}
