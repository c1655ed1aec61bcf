//! Subscription registry for realtime data-change events.
//!
//! Each logical subscription is keyed by a deterministic identity derived
//! from its resource, event filter and predicate. The registry holds at most
//! one entry per identity; subscribing again with the same triple returns
//! the existing identity without opening a second channel.
//!
//! Entry lifecycle:
//!
//! ```text
//! PENDING ──► SUBSCRIBED ──► ERROR ──► SUBSCRIBED (after reconnect)
//!    └──────────► ERROR
//! any ──► UNSUBSCRIBED (removed from the map immediately)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let id = client.subscribe(
//!     SubscriptionConfig::new("messages")
//!         .event(EventFilter::Insert)
//!         .filter("conversation_id", "c1")
//!         .on_change(|change| {
//!             println!("new message: {}", change.record);
//!             Ok(())
//!         }),
//! )?;
//! assert_eq!(id.as_str(), "messages:INSERT:conversation_id=c1");
//! ```

mod identity;
mod registry;
mod types;

pub use identity::canonical_identity;
pub use registry::{SubscriptionEntry, SubscriptionRegistry};
pub use types::{SubscriptionConfig, SubscriptionInfo};
