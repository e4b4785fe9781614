use serde::Deserialize;
use serde_json::Value;

use crate::{EventKind, FeedEvent, OpsDeckError, Transport};

/// Envelope used by push endpoints: `{"type": "...", "payload": ...}`.
/// Some producers put the body under `data` instead.
#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Decodes one push message into a feed event.
///
/// `event` is the transport-level event name (SSE `event:` field), if any.
/// Returns `Ok(None)` for well-formed messages of a type this crate does not
/// track, such as heartbeats.
pub(crate) fn decode_push_message(
    feed: &str,
    event: Option<&str>,
    data: &str,
) -> Result<Option<FeedEvent>, OpsDeckError> {
    let value: Value = serde_json::from_str(data).map_err(|err| {
        OpsDeckError::Decode(format!("invalid push message JSON: {err}; data: {data}"))
    })?;

    if let Some(name) = event.filter(|name| !name.is_empty() && *name != "message") {
        return Ok(EventKind::from_wire(name)
            .map(|kind| FeedEvent::new(feed, kind, value, Transport::Push)));
    }

    let has_envelope_body = value.get("payload").is_some() || value.get("data").is_some();
    if value.get("type").is_some_and(Value::is_string) {
        if let Ok(envelope) = serde_json::from_value::<PushEnvelope>(value.clone()) {
            if let Some(kind) = EventKind::from_wire(&envelope.kind) {
                let payload = envelope
                    .payload
                    .or(envelope.data)
                    .unwrap_or(value);
                return Ok(Some(FeedEvent::new(feed, kind, payload, Transport::Push)));
            }
            if has_envelope_body {
                return Ok(None);
            }
        }
    }

    // Bare records (e.g. a metrics sample) are updates of that record.
    Ok(Some(FeedEvent::new(
        feed,
        EventKind::ItemUpdated,
        value,
        Transport::Push,
    )))
}
