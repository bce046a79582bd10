//! Row-level change feeds
//!
//! A subscription names a channel and one or more [`ChangeFilter`]s. Matching
//! row changes arrive as [`ChangeEvent`]s on the returned
//! [`ChangeSubscription`]. Dropping (or calling `unsubscribe` on) the
//! subscription leaves the channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::query::{render_value, values_equal};

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Row inserted
    #[serde(rename = "INSERT")]
    Insert,
    /// Row updated
    #[serde(rename = "UPDATE")]
    Update,
    /// Row deleted
    #[serde(rename = "DELETE")]
    Delete,
    /// Any of the above (filters only)
    #[serde(rename = "*")]
    All,
}

impl ChangeKind {
    /// Whether a filter on `self` accepts an event of `kind`
    #[inline]
    #[must_use]
    pub fn accepts(self, kind: ChangeKind) -> bool {
        self == ChangeKind::All || self == kind
    }
}

/// Subscription filter: table, event kind and optional row predicate
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    /// Event kind to listen for
    pub event: ChangeKind,
    /// Database schema
    pub schema: String,
    /// Table name
    pub table: String,
    /// Optional `column = value` row predicate
    pub row: Option<(String, Value)>,
}

impl ChangeFilter {
    /// Listen for `event` on `table` in the `public` schema
    #[must_use]
    pub fn new(event: ChangeKind, table: impl Into<String>) -> Self {
        Self {
            event,
            schema: "public".to_string(),
            table: table.into(),
            row: None,
        }
    }

    /// Inserts into `table`
    #[inline]
    #[must_use]
    pub fn inserts(table: impl Into<String>) -> Self {
        Self::new(ChangeKind::Insert, table)
    }

    /// Any change on `table`
    #[inline]
    #[must_use]
    pub fn all(table: impl Into<String>) -> Self {
        Self::new(ChangeKind::All, table)
    }

    /// Only rows whose `column` equals `value`
    #[must_use]
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.row = Some((column.into(), value.into()));
        self
    }

    /// Wire form of the row predicate, e.g. `user_profile_id=eq.42`
    #[must_use]
    pub fn row_predicate(&self) -> Option<String> {
        self.row
            .as_ref()
            .map(|(column, value)| format!("{column}=eq.{}", render_value(value)))
    }

    /// Whether `event` passes this filter
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if !self.event.accepts(event.kind) || self.table != event.table || self.schema != event.schema
        {
            return false;
        }
        match &self.row {
            None => true,
            Some((column, expected)) => {
                let row = if event.kind == ChangeKind::Delete {
                    &event.old_record
                } else {
                    &event.record
                };
                row.get(column)
                    .is_some_and(|actual| values_equal(actual, expected))
            }
        }
    }
}

/// One row change delivered by a feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened
    pub kind: ChangeKind,
    /// Schema of the changed table
    pub schema: String,
    /// Changed table
    pub table: String,
    /// New row (empty object for deletes)
    pub record: Value,
    /// Previous row, when the feed provides it
    pub old_record: Value,
    /// Commit timestamp reported by the feed
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Create an event with no old record
    #[must_use]
    pub fn new(kind: ChangeKind, table: impl Into<String>, record: Value) -> Self {
        Self {
            kind,
            schema: "public".to_string(),
            table: table.into(),
            record,
            old_record: Value::Object(serde_json::Map::new()),
            commit_timestamp: None,
        }
    }

    /// With the previous row
    #[must_use]
    pub fn with_old_record(mut self, old_record: Value) -> Self {
        self.old_record = old_record;
        self
    }

    /// `id` of the new row (falls back to the old row for deletes)
    #[must_use]
    pub fn row_id(&self) -> Option<&Value> {
        self.record
            .get("id")
            .or_else(|| self.old_record.get("id"))
    }
}

/// Cleanup run when a subscription ends
type LeaveFn = Box<dyn FnOnce() + Send + Sync>;

/// A live subscription to a change feed
///
/// Leaves the channel when dropped.
pub struct ChangeSubscription {
    channel: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    on_leave: Option<LeaveFn>,
}

impl ChangeSubscription {
    /// Wrap a receiver and a leave callback
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        on_leave: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
            on_leave: Some(Box::new(on_leave)),
        }
    }

    /// Channel name
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event; `None` once the feed closed
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Leave the channel now
    pub fn unsubscribe(mut self) {
        self.leave();
    }

    fn leave(&mut self) {
        if let Some(on_leave) = self.on_leave.take() {
            tracing::debug!(channel = %self.channel, "leaving realtime channel");
            on_leave();
        }
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("channel", &self.channel)
            .field("active", &self.on_leave.is_some())
            .finish()
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.leave();
    }
}
