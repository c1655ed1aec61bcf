//! Transport-wide connection state.
//!
//! The tracker holds a single [`ConnectionState`](crate::types::ConnectionState),
//! starting at `DISCONNECTED`, and fans changes out to listeners. Raw status
//! strings from the system channel are mapped as:
//!
//! | raw            | state          |
//! |----------------|----------------|
//! | `CONNECTED`    | `CONNECTED`    |
//! | `CONNECTING`   | `CONNECTING`   |
//! | `DISCONNECTED` | `DISCONNECTED` |
//! | anything else  | `ERROR`        |
//!
//! Repeated identical statuses do not notify.

mod tracker;

pub use tracker::ConnectionTracker;
