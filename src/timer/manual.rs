//! Timer driven by a virtual clock.

use super::{Timer, TimerFire, TimerToken};
use parking_lot::Mutex;
use std::time::Duration;

struct ManualEntry {
    token: TimerToken,
    due: Duration,
    delay: Duration,
    fire: TimerFire,
    cancelled: bool,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    entries: Vec<ManualEntry>,
    history: Vec<Duration>,
}

/// Timer whose clock only moves when [`advance`](ManualTimer::advance) is
/// called.
///
/// Cancelled timers are remembered rather than forgotten, so a test can use
/// [`force_fire`](ManualTimer::force_fire) to reproduce a timer that fired
/// just before its cancellation landed.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward and fire every live timer that came due, in
    /// deadline order. Returns how many fired.
    pub fn advance(&self, by: Duration) -> usize {
        let due = {
            let mut state = self.state.lock();
            state.now += by;
            let now = state.now;

            let (mut due, rest): (Vec<ManualEntry>, Vec<ManualEntry>) =
                state.entries.drain(..).partition(|e| e.due <= now);
            state.entries = rest;
            due.retain(|e| !e.cancelled);
            due.sort_by_key(|e| (e.due, e.token));
            due
        };

        let count = due.len();
        for entry in due {
            entry.fire.fire();
        }
        count
    }

    /// Fire a timer immediately, cancelled or not.
    pub fn force_fire(&self, token: TimerToken) -> bool {
        let entry = {
            let mut state = self.state.lock();
            let pos = state.entries.iter().position(|e| e.token == token);
            pos.map(|i| state.entries.remove(i))
        };
        match entry {
            Some(entry) => entry.fire.fire(),
            None => false,
        }
    }

    /// Delays of live, unfired timers in deadline order.
    pub fn pending_delays(&self) -> Vec<Duration> {
        let state = self.state.lock();
        let mut live: Vec<&ManualEntry> = state.entries.iter().filter(|e| !e.cancelled).collect();
        live.sort_by_key(|e| (e.due, e.token));
        live.iter().map(|e| e.delay).collect()
    }

    /// Tokens of live, unfired timers.
    pub fn pending_tokens(&self) -> Vec<TimerToken> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|e| !e.cancelled)
            .map(|e| e.token)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().entries.iter().filter(|e| !e.cancelled).count()
    }

    /// Tokens that were cancelled before firing.
    pub fn cancelled_tokens(&self) -> Vec<TimerToken> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|e| e.cancelled)
            .map(|e| e.token)
            .collect()
    }

    /// Every delay ever scheduled, in scheduling order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.state.lock().history.clone()
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, token: TimerToken, delay: Duration, fire: TimerFire) {
        let mut state = self.state.lock();
        let due = state.now + delay;
        state.history.push(delay);
        state.entries.push(ManualEntry {
            token,
            due,
            delay,
            fire,
            cancelled: false,
        });
    }

    fn cancel(&self, token: TimerToken) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.token == token) {
            entry.cancelled = true;
        }
    }
}
