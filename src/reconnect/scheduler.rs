//! Reconnection bookkeeping.
//!
//! The scheduler decides; the client acts. It tracks attempt counters, the
//! pending timer per identity, and the shared sweep timer, but never arms or
//! cancels a timer itself. Every method returns what the caller has to do.

use super::policy::ReconnectPolicy;
use crate::timer::TimerToken;
use crate::types::SubscriptionId;
use std::collections::HashMap;
use std::time::Duration;

/// Per-identity reconnection state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconnectCounter {
    /// Attempts made since the last successful subscription.
    pub attempts: u32,
    /// Delay used for the most recent attempt.
    pub current_delay: Duration,
    /// Exhaustion has been reported.
    pub exhausted: bool,
    /// Timer armed for the next attempt, if any.
    pub pending: Option<TimerToken>,
}

/// What to do after an identity entered `ERROR`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Arm the offered token with this delay.
    Scheduled { attempt: u32, delay: Duration },
    /// A timer is already armed; nothing to do.
    AlreadyPending,
    /// The cap was just reached. Reported exactly once.
    Exhausted { attempts: u32 },
    /// The cap was reached earlier; stay quiet.
    GaveUp,
}

/// Tracks backoff state for every identity that has failed.
pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    counters: HashMap<SubscriptionId, ReconnectCounter>,
    sweep: Option<TimerToken>,
}

impl ReconnectScheduler {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            counters: HashMap::new(),
            sweep: None,
        }
    }

    /// Handle an `ERROR` transition for `id`, offering `token` for a new
    /// timer.
    pub fn schedule(&mut self, id: &SubscriptionId, token: TimerToken) -> ScheduleDecision {
        let counter = self.counters.entry(id.clone()).or_default();

        if counter.pending.is_some() {
            return ScheduleDecision::AlreadyPending;
        }

        if !self.policy.allows(counter.attempts) {
            if counter.exhausted {
                return ScheduleDecision::GaveUp;
            }
            counter.exhausted = true;
            tracing::error!(
                subscription = %id,
                attempts = counter.attempts,
                "reconnection attempts exhausted; giving up"
            );
            return ScheduleDecision::Exhausted {
                attempts: counter.attempts,
            };
        }

        counter.attempts += 1;
        let delay = self.policy.delay_for(counter.attempts);
        counter.current_delay = delay;
        counter.pending = Some(token);

        tracing::info!(
            subscription = %id,
            attempt = counter.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnection"
        );

        ScheduleDecision::Scheduled {
            attempt: counter.attempts,
            delay,
        }
    }

    /// A reconnection timer fired. Returns the attempt number if `token` is
    /// the one currently armed for `id`, clearing it.
    pub fn take_due(&mut self, id: &SubscriptionId, token: TimerToken) -> Option<u32> {
        let counter = self.counters.get_mut(id)?;
        if counter.pending != Some(token) {
            return None;
        }
        counter.pending = None;
        Some(counter.attempts)
    }

    /// The identity's channel reached `SUBSCRIBED`: back to base values.
    /// Returns the timer that was still armed, if any, so it can be
    /// cancelled.
    pub fn reset(&mut self, id: &SubscriptionId) -> Option<TimerToken> {
        self.counters.remove(id).and_then(|c| c.pending)
    }

    /// The identity was unsubscribed. Returns its armed timer, if any.
    pub fn forget(&mut self, id: &SubscriptionId) -> Option<TimerToken> {
        self.counters.remove(id).and_then(|c| c.pending)
    }

    /// Drop all state. Returns every armed timer, sweep included.
    pub fn forget_all(&mut self) -> Vec<TimerToken> {
        let mut tokens: Vec<TimerToken> =
            self.counters.drain().filter_map(|(_, c)| c.pending).collect();
        tokens.extend(self.sweep.take());
        tokens
    }

    /// Re-arm the debounced sweep with `token`. Returns the previous sweep
    /// timer, which must be cancelled.
    pub fn arm_sweep(&mut self, token: TimerToken) -> Option<TimerToken> {
        self.sweep.replace(token)
    }

    /// The sweep timer fired. True if `token` is the current sweep.
    pub fn take_sweep(&mut self, token: TimerToken) -> bool {
        if self.sweep == Some(token) {
            self.sweep = None;
            true
        } else {
            false
        }
    }

    pub fn sweep_armed(&self) -> bool {
        self.sweep.is_some()
    }

    pub fn attempts(&self, id: &SubscriptionId) -> u32 {
        self.counters.get(id).map(|c| c.attempts).unwrap_or(0)
    }

    pub fn counter(&self, id: &SubscriptionId) -> Option<&ReconnectCounter> {
        self.counters.get(id)
    }

    /// Delay of the attempt currently armed for `id`.
    pub fn pending_delay(&self, id: &SubscriptionId) -> Option<Duration> {
        self.counter(id)
            .filter(|c| c.pending.is_some())
            .map(|c| c.current_delay)
    }
}
