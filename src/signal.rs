//! Messages flowing through the client's inbox.
//!
//! Transport channels and timers never call into the registry directly.
//! They push a [`Signal`] into one queue and the client handles signals one
//! at a time, which keeps every registry mutation serialized and preserves
//! the order a channel emitted its statuses in.

use crate::timer::TimerToken;
use crate::types::{ChangeEvent, ChannelStatus, SubscriptionId};

/// Per-channel payload.
#[derive(Clone, Debug)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

/// A unit of work for the client's event loop.
#[derive(Clone, Debug)]
pub enum Signal {
    /// Something happened on a subscription channel. `generation` names the
    /// channel instance so signals from a replaced channel can be dropped.
    Channel {
        id: SubscriptionId,
        generation: u64,
        message: ChannelMessage,
    },

    /// Raw status string from the transport's system channel.
    System(String),

    /// A per-subscription reconnection timer fired.
    ReconnectDue { id: SubscriptionId, token: TimerToken },

    /// The shared sweep timer fired.
    SweepDue { token: TimerToken },
}
