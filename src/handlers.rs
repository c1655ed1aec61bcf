//! Handler types supplied by callers, and the guard used to invoke them.
//!
//! Handlers run on whichever thread drives the client's signal loop. A
//! handler that panics is caught and logged so one misbehaving consumer
//! cannot take the loop, the transport, or other subscriptions down with it.

use crate::error::RealtimeError;
use crate::types::{ChangeEvent, ConnectionState, SubscriptionId};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Outcome of a change handler. Errors are forwarded to `on_error`.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives every change event matching a subscription.
pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) -> HandlerResult + Send + Sync>;

/// Receives channel failures and change-handler failures.
pub type ErrorHandler = Arc<dyn Fn(&SubscriptionId, &RealtimeError) + Send + Sync>;

/// Told when a fresh channel has been opened for a failed subscription.
/// The second argument is the attempt number, starting at 1.
pub type ReconnectHandler = Arc<dyn Fn(&SubscriptionId, u32) + Send + Sync>;

/// Receives connection state changes.
pub type ConnectionListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Run a caller-supplied handler, converting a panic into `Err(message)`.
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> std::result::Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(&payload))
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

/// Invoke a change handler, folding both `Err` returns and panics into a
/// [`RealtimeError::Callback`].
pub(crate) fn deliver_change(
    handler: &ChangeHandler,
    event: &ChangeEvent,
) -> std::result::Result<(), RealtimeError> {
    match guarded(|| handler(event)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RealtimeError::Callback(e.to_string())),
        Err(panic) => Err(RealtimeError::Callback(panic)),
    }
}
