//! `opsdeck-http` is the data layer of an operations dashboard.
//!
//! It talks to a REST API and its push channels through three pieces:
//! - [`RequestExecutor`]: requests with timeouts, linear retry and an
//!   optional degraded fallback for reads
//! - [`FeedManager`]: real-time feeds over server-sent events with bounded
//!   exponential reconnect, falling back to polling
//! - [`HealthAggregator`]: per-service health probes folded into one report
//!
//! [`ResourceStore`]s cache each collection on top of them and
//! [`OpsDeckClient`] wires everything from a [`Config`].

pub mod aggregates;
mod client;
mod config;
mod decode;
mod error;
mod executor;
pub mod feed;
mod health;
mod models;
mod options;
mod request;
mod store;
mod types;
mod wire;

pub use client::{OpsDeckClient, API_SERVICE_NAME};
pub use config::{ApiMode, Config, DEFAULT_API_KEY_HEADER, DEFAULT_API_URL};
pub use error::OpsDeckError;
pub use executor::{Auth, RequestExecutor};
pub use feed::{
    ChannelMessage, ChannelState, ConnectionStatus, EventKind, FeedConfig, FeedEvent, FeedManager,
    PollingOnly, PushChannel, PushConnector, SseConnector, Subscription, Transport,
};
pub use health::{
    HealthAggregator, HealthMonitor, HealthReport, HealthStatus, OverallHealth, ServiceHealth,
    ServiceProbe,
};
pub use models::{AiSummary, Alert, Anomaly, Incident, MetricSample, RcaFlow, TemperatureReading};
pub use options::{ClientOptions, FeedOptions};
pub use request::{Method, RequestDescriptor};
pub use store::{Resource, ResourceStore, Snapshot};
pub use types::{Fallback, Fetched};

pub type Result<T> = std::result::Result<T, OpsDeckError>;
