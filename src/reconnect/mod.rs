//! Bounded reconnection with multiplicative backoff.
//!
//! An identity enters the scheduler when its status becomes `ERROR`. Each
//! failure arms one timer with delay `base × 1.5^(attempt-1)`; once
//! `max_attempts` have been spent the failure is logged once and the
//! identity is left in `ERROR`. A successful subscription resets the
//! counter.
//!
//! A global disconnect re-arms one shared sweep timer instead of spawning a
//! timer per subscription; when it fires every `ERROR` entry is scheduled
//! individually.

mod policy;
mod scheduler;

pub use policy::ReconnectPolicy;
pub use scheduler::{ReconnectCounter, ReconnectScheduler, ScheduleDecision};
