//! Subscription configuration and snapshot types.

use super::identity::canonical_identity;
use crate::error::{RealtimeError, Result};
use crate::handlers::{ChangeHandler, ErrorHandler, HandlerResult, ReconnectHandler};
use crate::transport::ChannelBinding;
use crate::types::{ChangeEvent, EventFilter, Predicate, SubscriptionId, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Recipe for a subscription.
///
/// Immutable once handed to the client; replayed verbatim on every
/// reconnection.
#[derive(Clone)]
pub struct SubscriptionConfig {
    /// Table to listen on.
    pub resource: String,

    /// Change kinds to receive.
    /// Default: all
    pub event: EventFilter,

    /// Column equality conditions.
    pub predicate: Predicate,

    /// Schema of the table (None = the client's default schema).
    pub schema: Option<String>,

    /// Required. Receives matching changes.
    pub on_change: Option<ChangeHandler>,

    pub on_error: Option<ErrorHandler>,

    pub on_reconnect: Option<ReconnectHandler>,
}

impl SubscriptionConfig {
    /// Listen to every change on `resource`.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            event: EventFilter::All,
            predicate: Predicate::new(),
            schema: None,
            on_change: None,
            on_error: None,
            on_reconnect: None,
        }
    }

    pub fn event(mut self, event: EventFilter) -> Self {
        self.event = event;
        self
    }

    /// Add a `key = value` condition.
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicate = self.predicate.where_eq(key, value);
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn on_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&ChangeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&SubscriptionId, &RealtimeError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_reconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&SubscriptionId, u32) + Send + Sync + 'static,
    {
        self.on_reconnect = Some(Arc::new(f));
        self
    }

    /// Reject configurations that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.resource.trim().is_empty() {
            return Err(RealtimeError::InvalidConfig(
                "resource name must not be empty".to_string(),
            ));
        }
        if self.resource.contains(':') {
            return Err(RealtimeError::InvalidConfig(format!(
                "resource name '{}' must not contain ':'",
                self.resource
            )));
        }
        if let Some(schema) = &self.schema {
            if schema.trim().is_empty() {
                return Err(RealtimeError::InvalidConfig(
                    "schema must not be empty when given".to_string(),
                ));
            }
        }
        if self.predicate.pairs().iter().any(|(k, _)| k.trim().is_empty()) {
            return Err(RealtimeError::InvalidConfig(
                "predicate keys must not be empty".to_string(),
            ));
        }
        if self.on_change.is_none() {
            return Err(RealtimeError::InvalidConfig(format!(
                "subscription to '{}' has no change handler",
                self.resource
            )));
        }
        Ok(())
    }

    pub fn identity(&self) -> SubscriptionId {
        canonical_identity(&self.resource, self.event, &self.predicate)
    }

    /// What the transport channel should listen for.
    pub fn binding(&self, default_schema: &str) -> ChannelBinding {
        ChannelBinding {
            schema: self
                .schema
                .clone()
                .unwrap_or_else(|| default_schema.to_string()),
            table: self.resource.clone(),
            event: self.event,
            predicate: self.predicate.clone(),
        }
    }
}

impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("resource", &self.resource)
            .field("event", &self.event)
            .field("predicate", &self.predicate)
            .field("schema", &self.schema)
            .field("on_change", &self.on_change.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .finish()
    }
}

/// Point-in-time view of a subscription, for diagnostics and UI indicators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub resource: String,
    pub event: EventFilter,
    pub status: SubscriptionStatus,
    pub last_error: Option<String>,
    /// Reconnection attempts since the last successful subscription.
    pub reconnect_attempts: u32,
    /// Delay of the reconnection attempt currently armed, if any.
    pub retry_delay_ms: Option<u64>,
    pub created_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &ChangeEvent) -> HandlerResult {
        Ok(())
    }

    #[test]
    fn test_builder_and_identity() {
        let config = SubscriptionConfig::new("messages")
            .event(EventFilter::Insert)
            .filter("conversation_id", "c1")
            .on_change(noop);

        assert!(config.validate().is_ok());
        assert_eq!(config.identity().as_str(), "messages:INSERT:conversation_id=c1");
    }

    #[test]
    fn test_missing_resource_is_rejected() {
        let config = SubscriptionConfig::new("  ").on_change(noop);
        assert!(matches!(config.validate(), Err(RealtimeError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_change_handler_is_rejected() {
        let config = SubscriptionConfig::new("messages");
        assert!(matches!(config.validate(), Err(RealtimeError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_predicate_key_is_rejected() {
        let config = SubscriptionConfig::new("messages").filter("", "x").on_change(noop);
        assert!(matches!(config.validate(), Err(RealtimeError::InvalidConfig(_))));
    }

    #[test]
    fn test_binding_uses_default_schema() {
        let config = SubscriptionConfig::new("events").on_change(noop);
        assert_eq!(config.binding("public").schema, "public");

        let config = config.schema("clubs");
        assert_eq!(config.binding("public").schema, "clubs");
    }
}
