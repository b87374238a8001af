// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Rendezvous for "all workers have exited".
#[derive(Debug)]
pub struct Countdown {
    remaining: Mutex<usize>,
    cvar: Condvar,
}

impl Countdown {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            cvar: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.cvar.notify_all();
        }
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) {
        // pattern is described on https://doc.rust-lang.org/stable/std/sync/struct.Condvar.html
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        while *remaining > 0 {
            remaining = self
                .cvar
                .wait(remaining)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns `true` if the count reached zero before `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        let (remaining, _) = self
            .cvar
            .wait_timeout_while(remaining, timeout, |remaining| *remaining > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *remaining == 0
    }
}

/// Counts down when dropped, so a worker is accounted for even if its thread
/// unwinds.
#[derive(Debug)]
pub struct CountdownGuard<'a>(pub &'a Countdown);

impl Drop for CountdownGuard<'_> {
    fn drop(&mut self) {
        self.0.count_down();
    }
}
