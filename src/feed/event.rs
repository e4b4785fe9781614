use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// What happened to the feed's items.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewItem,
    ItemUpdated,
    ItemResolved,
    Batch,
    Error,
}

impl EventKind {
    /// Maps a wire message type onto an event kind.
    ///
    /// Accepts the generic names (`new_item`, `item_updated`, ...) as well as
    /// per-feed ones such as `new_alert`, `alert_resolved`, `bulk_alerts`,
    /// `metrics_update`, `cpu_alert` and `ml_analysis_complete`.
    pub fn from_wire(kind: &str) -> Option<Self> {
        let kind = kind.trim().to_ascii_lowercase();
        let kind = kind.as_str();
        if kind == "error" {
            return Some(Self::Error);
        }
        if kind == "batch" || kind.starts_with("bulk_") || kind.ends_with("_batch") {
            return Some(Self::Batch);
        }
        if kind.ends_with("_resolved") {
            return Some(Self::ItemResolved);
        }
        if kind.ends_with("_updated") || kind.ends_with("_update") {
            return Some(Self::ItemUpdated);
        }
        if kind.starts_with("new_")
            || kind.ends_with("_alert")
            || kind.ends_with("_exceeded")
            || kind.ends_with("_complete")
        {
            return Some(Self::NewItem);
        }
        None
    }
}

/// Transport that carried an event. Polling data is only as fresh as the
/// last poll interval.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Push,
    Poll,
}

/// One event delivered to a feed subscriber.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeedEvent {
    pub feed: String,
    pub kind: EventKind,
    pub payload: Value,
    pub source: Transport,
    pub received_at: DateTime<Utc>,
}

impl FeedEvent {
    pub fn new(
        feed: impl Into<String>,
        kind: EventKind,
        payload: Value,
        source: Transport,
    ) -> Self {
        Self {
            feed: feed.into(),
            kind,
            payload,
            source,
            received_at: Utc::now(),
        }
    }

    pub(crate) fn error(
        feed: impl Into<String>,
        message: impl Into<String>,
        source: Transport,
    ) -> Self {
        Self::new(
            feed,
            EventKind::Error,
            json!({ "message": message.into() }),
            source,
        )
    }
}
