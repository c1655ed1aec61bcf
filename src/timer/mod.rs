//! One-shot timers.
//!
//! A timer never calls back into the client. When it fires it pushes the
//! signal it was armed with into the client's inbox, where it is handled like
//! any other signal. Cancellation is best effort: a timer that has already
//! fired may still be sitting in the inbox, so handlers re-validate before
//! acting.
//!
//! - [`ThreadTimer`]: deadline heap on a dedicated thread
//! - [`ManualTimer`]: virtual clock advanced by hand, for tests

mod manual;
mod thread;

pub use manual::ManualTimer;
pub use thread::ThreadTimer;

use crate::signal::Signal;
use crossbeam_channel::Sender;
use std::time::Duration;

/// Identifies one armed timer. Allocated by the client, unique per client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

/// What to do when a timer fires.
#[derive(Debug)]
pub struct TimerFire {
    signal: Signal,
    tx: Sender<Signal>,
}

impl TimerFire {
    pub(crate) fn new(signal: Signal, tx: Sender<Signal>) -> Self {
        Self { signal, tx }
    }

    /// Deliver the signal. Returns false if the client is gone.
    pub fn fire(self) -> bool {
        self.tx.send(self.signal).is_ok()
    }
}

/// Timer service used by the reconnection scheduler.
pub trait Timer: Send + Sync {
    /// Arm a one-shot timer.
    fn schedule(&self, token: TimerToken, delay: Duration, fire: TimerFire);

    /// Disarm a timer. Unknown or already-fired tokens are ignored.
    fn cancel(&self, token: TimerToken);
}
