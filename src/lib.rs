//! # Book Club Realtime
//!
//! Realtime subscription and connection management for the book-club
//! application: one logical subscription per data-change query, a single
//! view of transport connectivity, and bounded automatic recovery when the
//! transport fails.
//!
//! ## Core Concepts
//!
//! - **Subscriptions**: keyed by a deterministic identity; subscribing twice
//!   with the same resource, event and predicate opens one channel
//! - **Connection state**: `DISCONNECTED | CONNECTING | CONNECTED | ERROR`,
//!   observable through listeners
//! - **Reconnection**: failed subscriptions are reopened after
//!   `2000ms × 1.5^(attempt-1)`, at most five times
//! - **Transport**: the backend's pub/sub primitive, behind a trait
//!
//! ## Example
//!
//! ```ignore
//! use bookclub_realtime::{EventFilter, RealtimeClient, RealtimeConfig, SubscriptionConfig};
//!
//! let client = RealtimeClient::with_thread_timer(RealtimeConfig::default(), transport)?;
//! let _dispatcher = client.spawn_dispatcher()?;
//!
//! let id = client.subscribe(
//!     SubscriptionConfig::new("messages")
//!         .event(EventFilter::Insert)
//!         .filter("conversation_id", "c1")
//!         .on_change(|change| {
//!             println!("{}", change.record);
//!             Ok(())
//!         })
//!         .on_error(|id, err| eprintln!("{}: {}", id, err)),
//! )?;
//!
//! client.add_connection_state_listener(|state| println!("connection: {}", state));
//!
//! // Teardown
//! client.unsubscribe_all();
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod reconnect;
pub mod signal;
pub mod subscriptions;
pub mod timer;
pub mod transport;
pub mod types;

// Re-exports
pub use client::{Dispatcher, RealtimeClient, RealtimeConfig};
pub use connection::ConnectionTracker;
pub use error::{RealtimeError, Result};
pub use handlers::{ChangeHandler, ConnectionListener, ErrorHandler, HandlerResult, ReconnectHandler};
pub use reconnect::{ReconnectCounter, ReconnectPolicy, ReconnectScheduler, ScheduleDecision};
pub use signal::{ChannelMessage, Signal};
pub use subscriptions::{
    canonical_identity, SubscriptionConfig, SubscriptionEntry, SubscriptionInfo,
    SubscriptionRegistry,
};
pub use timer::{ManualTimer, ThreadTimer, Timer, TimerFire, TimerToken};
pub use transport::{
    ChannelBinding, ChannelHandle, ChannelSink, MemoryTransport, OpenedChannel, SystemSink,
    Transport,
};
pub use types::*;
