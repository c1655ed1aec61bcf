//! Core types for the realtime layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Deterministic identity of a logical subscription.
///
/// Derived from `(resource, event, predicate)`; see
/// [`canonical_identity`](crate::subscriptions::canonical_identity).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which change kinds a subscription listens for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventFilter {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[default]
    #[serde(rename = "*")]
    All,
}

impl EventFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::Insert => "INSERT",
            EventFilter::Update => "UPDATE",
            EventFilter::Delete => "DELETE",
            EventFilter::All => "*",
        }
    }

    /// Whether a change of the given kind passes this filter.
    pub fn accepts(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventFilter::All, _)
                | (EventFilter::Insert, ChangeKind::Insert)
                | (EventFilter::Update, ChangeKind::Update)
                | (EventFilter::Delete, ChangeKind::Delete)
        )
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a single row change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Equality predicate on record columns, e.g. `conversation_id = c1`.
///
/// Pairs keep the order the caller supplied them in and are handed to the
/// transport verbatim. Identity derivation sorts them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate(Vec<(String, String)>);

impl Predicate {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a `key = value` condition.
    pub fn where_eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pairs sorted by key, then value, with repeats removed.
    pub fn canonical_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> =
            self.0.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }

    /// Check a record against every condition.
    ///
    /// Non-string JSON scalars are compared by their JSON text, so a numeric
    /// column `42` matches the predicate value `"42"`.
    pub fn matches(&self, record: &serde_json::Value) -> bool {
        self.0.iter().all(|(key, expected)| match record.get(key) {
            Some(serde_json::Value::String(s)) => s == expected,
            Some(serde_json::Value::Null) | None => false,
            Some(other) => other.to_string() == *expected,
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Predicate {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Lifecycle status of a subscription entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    Subscribed,
    Error,
    Unsubscribed,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Pending => "PENDING",
            SubscriptionStatus::Subscribed => "SUBSCRIBED",
            SubscriptionStatus::Error => "ERROR",
            SubscriptionStatus::Unsubscribed => "UNSUBSCRIBED",
        };
        f.write_str(s)
    }
}

/// Process-wide belief about transport connectivity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// Map a raw system-channel status string. Unknown strings mean `Error`.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "CONNECTED" => ConnectionState::Connected,
            "CONNECTING" => ConnectionState::Connecting,
            "DISCONNECTED" => ConnectionState::Disconnected,
            _ => ConnectionState::Error,
        }
    }

    /// States that should trigger a global reconnection sweep.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Status reported by a transport channel for its own subscribe handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
}

impl ChannelStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ChannelStatus::Subscribed)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::Subscribed => "SUBSCRIBED",
            ChannelStatus::ChannelError => "CHANNEL_ERROR",
            ChannelStatus::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// A row change delivered to `on_change` handlers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub schema: String,
    pub table: String,
    pub kind: ChangeKind,
    /// New row image (empty object for deletes).
    pub record: serde_json::Value,
    /// Previous row image, when the backend sends one.
    pub old_record: Option<serde_json::Value>,
    /// Commit time in milliseconds since Unix epoch.
    pub commit_timestamp: u64,
}

impl ChangeEvent {
    /// Build an event in the `public` schema stamped with the current time.
    pub fn new(table: impl Into<String>, kind: ChangeKind, record: serde_json::Value) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.into(),
            kind,
            record,
            old_record: None,
            commit_timestamp: now_millis(),
        }
    }

    pub fn with_old_record(mut self, old: serde_json::Value) -> Self {
        self.old_record = Some(old);
        self
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Row image used for predicate matching: the old row for deletes.
    pub fn match_image(&self) -> &serde_json::Value {
        match (self.kind, &self.old_record) {
            (ChangeKind::Delete, Some(old)) => old,
            _ => &self.record,
        }
    }
}

/// Handle returned by `add_connection_state_listener`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Milliseconds since Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
