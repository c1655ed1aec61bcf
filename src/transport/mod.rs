//! Transport channel abstraction.
//!
//! The backend's pub/sub primitive is an external collaborator. This module
//! fixes the seam the client talks through:
//!
//! - [`Transport::open_system_channel`]: opened once, reports raw
//!   transport-wide status strings
//! - [`Transport::open_channel`]: opens a logical channel bound to a
//!   table/event/predicate; statuses and changes come back through the sink
//! - [`Transport::close_channel`]: releases a channel, fire-and-forget
//!
//! [`MemoryTransport`] is an in-process implementation used by the tests.

mod memory;

pub use memory::{MemoryTransport, OpenedChannel};

use crate::error::Result;
use crate::signal::{ChannelMessage, Signal};
use crate::types::{ChangeEvent, ChannelStatus, EventFilter, Predicate, SubscriptionId};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// What a channel listens for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub schema: String,
    pub table: String,
    pub event: EventFilter,
    pub predicate: Predicate,
}

impl ChannelBinding {
    /// Check whether a change event should be delivered on this binding.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.schema == self.schema
            && event.table == self.table
            && self.event.accepts(event.kind)
            && self.predicate.matches(event.match_image())
    }
}

/// Opaque handle for an open channel, assigned by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub u64);

/// Where a subscription channel reports its statuses and changes.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    id: SubscriptionId,
    generation: u64,
    tx: Sender<Signal>,
}

impl ChannelSink {
    pub(crate) fn new(id: SubscriptionId, generation: u64, tx: Sender<Signal>) -> Self {
        Self { id, generation, tx }
    }

    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a handshake status. Returns false once the client is gone.
    pub fn status(&self, status: ChannelStatus) -> bool {
        self.send(ChannelMessage::Status(status))
    }

    /// Deliver a change event. Returns false once the client is gone.
    pub fn change(&self, event: ChangeEvent) -> bool {
        self.send(ChannelMessage::Change(event))
    }

    fn send(&self, message: ChannelMessage) -> bool {
        self.tx
            .send(Signal::Channel {
                id: self.id.clone(),
                generation: self.generation,
                message,
            })
            .is_ok()
    }
}

/// Where the system channel reports transport-wide status.
#[derive(Clone, Debug)]
pub struct SystemSink {
    tx: Sender<Signal>,
}

impl SystemSink {
    pub(crate) fn new(tx: Sender<Signal>) -> Self {
        Self { tx }
    }

    /// Report a raw status string such as `"CONNECTED"`.
    pub fn status(&self, raw: &str) -> bool {
        self.tx.send(Signal::System(raw.to_string())).is_ok()
    }
}

/// The backend's pub/sub primitive.
pub trait Transport: Send + Sync {
    /// Open the transport-wide status channel. Called once per client.
    fn open_system_channel(&self, sink: SystemSink) -> Result<()>;

    /// Open a logical channel and start its subscribe handshake.
    ///
    /// The outcome of the handshake is reported later through `sink`, never
    /// by blocking here.
    fn open_channel(
        &self,
        name: &str,
        binding: &ChannelBinding,
        sink: ChannelSink,
    ) -> Result<ChannelHandle>;

    /// Release a channel. Unknown handles are ignored.
    fn close_channel(&self, handle: ChannelHandle);
}
