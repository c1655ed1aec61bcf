//! Error types for the realtime layer.

use crate::types::ChannelStatus;
use thiserror::Error;

/// Main error type for realtime operations.
///
/// Only `InvalidConfig` is ever returned synchronously from the public API.
/// The remaining variants are delivered to `on_error` handlers and recorded
/// as an entry's last error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    #[error("Invalid subscription config: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel reported {0}")]
    Channel(ChannelStatus),

    #[error("Change handler failed: {0}")]
    Callback(String),

    #[error("Reconnection gave up after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("Failed to start worker thread: {0}")]
    Thread(String),
}

impl RealtimeError {
    /// Whether automatic reconnection may still recover from this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RealtimeError::Transport(_) | RealtimeError::Channel(_))
    }
}

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;
