//! Subscription registry: the identity → entry map.

use super::types::{SubscriptionConfig, SubscriptionInfo};
use crate::error::RealtimeError;
use crate::transport::ChannelHandle;
use crate::types::{now_millis, SubscriptionId, SubscriptionStatus};
use std::collections::HashMap;
use std::time::Duration;

/// Live state of one subscription. Owned exclusively by the registry.
pub struct SubscriptionEntry {
    pub id: SubscriptionId,
    pub config: SubscriptionConfig,
    /// Channel currently serving this entry. `None` while an open is in
    /// flight or after a failed open.
    pub channel: Option<ChannelHandle>,
    /// Tag of the channel instance this entry currently trusts.
    pub generation: u64,
    pub status: SubscriptionStatus,
    pub last_error: Option<RealtimeError>,
    pub created_at_ms: u64,
}

impl SubscriptionEntry {
    pub fn info(
        &self,
        reconnect_attempts: u32,
        retry_delay: Option<Duration>,
    ) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id.clone(),
            resource: self.config.resource.clone(),
            event: self.config.event,
            status: self.status,
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
            reconnect_attempts,
            retry_delay_ms: retry_delay.map(|d| d.as_millis() as u64),
            created_at_ms: self.created_at_ms,
        }
    }
}

/// Map from identity to entry.
///
/// Not synchronized on its own; the client keeps it behind its state mutex.
/// Every status-changing method takes the generation the signal came from
/// and refuses to act for any other one.
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionId, SubscriptionEntry>,
    next_generation: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&SubscriptionEntry> {
        self.entries.get(id)
    }

    pub fn status(&self, id: &SubscriptionId) -> Option<SubscriptionStatus> {
        self.entries.get(id).map(|e| e.status)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionEntry> {
        self.entries.values()
    }

    /// Check-and-insert a `PENDING` entry.
    ///
    /// Returns the generation for the channel about to be opened, or `None`
    /// if the identity is already registered.
    pub fn insert_pending(&mut self, id: SubscriptionId, config: SubscriptionConfig) -> Option<u64> {
        if self.entries.contains_key(&id) {
            return None;
        }

        let generation = self.bump_generation();
        self.entries.insert(
            id.clone(),
            SubscriptionEntry {
                id,
                config,
                channel: None,
                generation,
                status: SubscriptionStatus::Pending,
                last_error: None,
                created_at_ms: now_millis(),
            },
        );
        Some(generation)
    }

    /// Record the handle of a freshly-opened channel.
    ///
    /// Returns false if the entry went away or moved on to another
    /// generation meanwhile; the caller then owns the handle and must close
    /// it.
    pub fn attach_channel(
        &mut self,
        id: &SubscriptionId,
        generation: u64,
        handle: ChannelHandle,
    ) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.generation == generation => {
                entry.channel = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Start a replacement channel for `id`.
    ///
    /// Bumps the generation so signals from the old channel are ignored and
    /// hands back the old handle for the caller to close. Status is left
    /// as it is.
    pub fn begin_replacement(
        &mut self,
        id: &SubscriptionId,
    ) -> Option<(u64, Option<ChannelHandle>, SubscriptionConfig)> {
        let generation = self.next_generation;
        let entry = self.entries.get_mut(id)?;
        self.next_generation += 1;

        entry.generation = generation;
        let old = entry.channel.take();
        Some((generation, old, entry.config.clone()))
    }

    /// `SUBSCRIBED` from the current channel. Clears the last error.
    pub fn mark_subscribed(&mut self, id: &SubscriptionId, generation: u64) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.generation == generation => {
                entry.status = SubscriptionStatus::Subscribed;
                entry.last_error = None;
                true
            }
            _ => false,
        }
    }

    /// A failure on the current channel.
    pub fn mark_error(
        &mut self,
        id: &SubscriptionId,
        generation: u64,
        error: RealtimeError,
    ) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.generation == generation => {
                entry.status = SubscriptionStatus::Error;
                entry.last_error = Some(error);
                true
            }
            _ => false,
        }
    }

    /// Automatic reconnection stopped for `id`. Status stays `ERROR`; the
    /// last error now says so.
    pub fn mark_exhausted(&mut self, id: &SubscriptionId, attempts: u32) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.last_error = Some(RealtimeError::ReconnectExhausted(attempts));
                true
            }
            None => false,
        }
    }

    /// Remove an entry. The returned entry is marked `UNSUBSCRIBED`.
    pub fn remove(&mut self, id: &SubscriptionId) -> Option<SubscriptionEntry> {
        let mut entry = self.entries.remove(id)?;
        entry.status = SubscriptionStatus::Unsubscribed;
        Some(entry)
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<SubscriptionEntry> {
        self.entries
            .drain()
            .map(|(_, mut entry)| {
                entry.status = SubscriptionStatus::Unsubscribed;
                entry
            })
            .collect()
    }

    /// Identities currently in `status`, sorted for stable iteration.
    pub fn ids_with_status(&self, status: SubscriptionStatus) -> Vec<SubscriptionId> {
        let mut ids: Vec<SubscriptionId> = self
            .entries
            .values()
            .filter(|e| e.status == status)
            .map(|e| e.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
