//! In-process transport.
//!
//! Keeps every channel it was asked to open and lets the caller play the
//! backend's part: acknowledge or fail handshakes, push change events, and
//! report transport-wide status.

use super::{ChannelBinding, ChannelHandle, ChannelSink, SystemSink, Transport};
use crate::error::{RealtimeError, Result};
use crate::types::{ChangeEvent, ChannelStatus, SubscriptionId};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// A channel opened through [`MemoryTransport`].
#[derive(Clone, Debug)]
pub struct OpenedChannel {
    pub handle: ChannelHandle,
    pub name: String,
    pub binding: ChannelBinding,
    sink: ChannelSink,
}

impl OpenedChannel {
    pub fn subscription_id(&self) -> &SubscriptionId {
        self.sink.subscription_id()
    }

    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }
}

#[derive(Default)]
struct MemoryState {
    system: Option<SystemSink>,
    /// Every channel ever opened, in open order.
    channels: Vec<OpenedChannel>,
    open: HashSet<ChannelHandle>,
    closed: Vec<ChannelHandle>,
    fail_next: VecDeque<String>,
    next_handle: u64,
}

/// Transport that lives entirely in memory.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open_channel` call fail with the given reason.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.state.lock().fail_next.push_back(reason.into());
    }

    /// Number of successful `open_channel` calls so far.
    pub fn open_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Number of channels opened and not yet closed.
    pub fn live_count(&self) -> usize {
        self.state.lock().open.len()
    }

    /// All channels ever opened, in open order.
    pub fn opened(&self) -> Vec<OpenedChannel> {
        self.state.lock().channels.clone()
    }

    /// Handles passed to `close_channel`, in close order.
    pub fn closed(&self) -> Vec<ChannelHandle> {
        self.state.lock().closed.clone()
    }

    pub fn is_open(&self, handle: ChannelHandle) -> bool {
        self.state.lock().open.contains(&handle)
    }

    /// Most recently opened channel for a subscription, open or not.
    pub fn latest_channel(&self, id: &SubscriptionId) -> Option<OpenedChannel> {
        self.state
            .lock()
            .channels
            .iter()
            .rev()
            .find(|c| c.subscription_id() == id)
            .cloned()
    }

    /// Report a status on the subscription's current open channel.
    pub fn emit_status(&self, id: &SubscriptionId, status: ChannelStatus) -> bool {
        match self.live_sink(id) {
            Some(sink) => sink.status(status),
            None => false,
        }
    }

    /// Report a status on a specific channel, even one already closed.
    pub fn emit_status_on(&self, handle: ChannelHandle, status: ChannelStatus) -> bool {
        let sink = {
            let state = self.state.lock();
            state
                .channels
                .iter()
                .find(|c| c.handle == handle)
                .map(|c| c.sink.clone())
        };
        match sink {
            Some(sink) => sink.status(status),
            None => false,
        }
    }

    /// Acknowledge the handshake of every open channel.
    pub fn acknowledge_all(&self) -> usize {
        let sinks: Vec<ChannelSink> = {
            let state = self.state.lock();
            state
                .channels
                .iter()
                .filter(|c| state.open.contains(&c.handle))
                .map(|c| c.sink.clone())
                .collect()
        };
        sinks
            .iter()
            .filter(|sink| sink.status(ChannelStatus::Subscribed))
            .count()
    }

    /// Route a change to every open channel whose binding matches it.
    /// Returns the number of channels it was delivered to.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let sinks: Vec<ChannelSink> = {
            let state = self.state.lock();
            state
                .channels
                .iter()
                .filter(|c| state.open.contains(&c.handle) && c.binding.matches(event))
                .map(|c| c.sink.clone())
                .collect()
        };
        sinks
            .iter()
            .filter(|sink| sink.change(event.clone()))
            .count()
    }

    /// Report a raw transport-wide status on the system channel.
    pub fn emit_system(&self, raw: &str) -> bool {
        let sink = self.state.lock().system.clone();
        match sink {
            Some(sink) => sink.status(raw),
            None => false,
        }
    }

    fn live_sink(&self, id: &SubscriptionId) -> Option<ChannelSink> {
        let state = self.state.lock();
        state
            .channels
            .iter()
            .rev()
            .find(|c| c.subscription_id() == id && state.open.contains(&c.handle))
            .map(|c| c.sink.clone())
    }
}

impl Transport for MemoryTransport {
    fn open_system_channel(&self, sink: SystemSink) -> Result<()> {
        self.state.lock().system = Some(sink);
        Ok(())
    }

    fn open_channel(
        &self,
        name: &str,
        binding: &ChannelBinding,
        sink: ChannelSink,
    ) -> Result<ChannelHandle> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next.pop_front() {
            return Err(RealtimeError::Transport(reason));
        }

        state.next_handle += 1;
        let handle = ChannelHandle(state.next_handle);
        state.open.insert(handle);
        state.channels.push(OpenedChannel {
            handle,
            name: name.to_string(),
            binding: binding.clone(),
            sink,
        });
        Ok(handle)
    }

    fn close_channel(&self, handle: ChannelHandle) {
        let mut state = self.state.lock();
        if state.open.remove(&handle) {
            state.closed.push(handle);
        }
    }
}
