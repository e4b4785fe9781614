//! Real-time feeds: push channels with reconnect, falling back to polling.
//!
//! A subscription moves through `connecting -> open`, back to `connecting`
//! on channel errors while the reconnect budget lasts, and ends `failed`
//! once it is spent or `closed` on unsubscribe. Reconnect delays grow as
//! `reconnect_backoff_ms × 2^attempt`; a successful open resets the count.
//!
//! If the push channel cannot be created, or the first connection never
//! opens within the grace period, the same callback is fed by polling the
//! feed's REST resource instead. Every event says which transport carried it.

mod channel;
mod event;
mod manager;
mod sse;

pub use channel::{ChannelMessage, PollingOnly, PushChannel, PushConnector};
pub use event::{EventKind, FeedEvent, Transport};
pub use manager::{ChannelState, ConnectionStatus, FeedConfig, FeedManager, Subscription};
pub use sse::SseConnector;
