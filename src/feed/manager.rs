use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{interval, sleep, timeout, MissedTickBehavior},
};

use crate::{
    aggregates::flag_anomalies, wire::decode_push_message, ChannelMessage, EventKind, FeedEvent,
    FeedOptions, Fetched, OpsDeckError, PushChannel, PushConnector, RequestDescriptor,
    RequestExecutor, Result, Transport,
};

/// Where a feed's data comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedConfig {
    pub key: String,
    /// Push endpoint relative to the connector's base URL. `None` polls only.
    pub push_path: Option<String>,
    /// REST resource polled when push is unavailable.
    pub poll_path: String,
    pub poll_interval: Duration,
    /// Query parameters sent on both the push and the poll request,
    /// e.g. `server=srv-002`.
    pub params: Vec<(String, String)>,
    /// Attach `anomaly_detected` flags to pushed metric records.
    pub flag_anomalies: bool,
}

impl FeedConfig {
    pub fn polling(
        key: impl Into<String>,
        poll_path: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            push_path: None,
            poll_path: poll_path.into(),
            poll_interval,
            params: Vec::new(),
            flag_anomalies: false,
        }
    }

    pub fn with_push(mut self, push_path: impl Into<String>) -> Self {
        self.push_path = Some(push_path.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn with_anomaly_flags(mut self) -> Self {
        self.flag_anomalies = true;
        self
    }

    /// The dashboard's standard feeds.
    ///
    /// `alerts`, `metrics` and `ml-analysis` have push endpoints; `incidents`,
    /// `temperature`, `rca` and `anomalies` are polled.
    pub fn defaults() -> Vec<Self> {
        let every = Duration::from_secs;
        vec![
            Self::polling("alerts", "/alerts", every(10)).with_push("/sse/alerts"),
            Self::polling("metrics", "/metrics", every(5))
                .with_push("/sse/metrics")
                .with_anomaly_flags(),
            Self::polling("ml-analysis", "/aiSummaries", every(30)).with_push("/sse/ml-analysis"),
            Self::polling("incidents", "/incidents", every(30)),
            Self::polling("temperature", "/temperatureData", every(30)),
            Self::polling("rca", "/rcaFlows", every(30)),
            Self::polling("anomalies", "/anomalies", every(30)),
        ]
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Failed,
}

/// Point-in-time view of one feed connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub feed: String,
    pub transport: Transport,
    pub state: ChannelState,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub backoff_base_ms: u64,
}

/// Token returned by [`FeedManager::subscribe`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    feed: String,
}

impl Subscription {
    pub fn feed(&self) -> &str {
        &self.feed
    }
}

type Callback = Box<dyn FnMut(FeedEvent) + Send>;

/// Delivery point for one subscription. Closing takes the same lock as
/// delivery, so no callback runs once `close` has returned.
struct EventSink {
    callback: Mutex<Option<Callback>>,
}

impl EventSink {
    fn new(callback: Callback) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
        }
    }

    fn deliver(&self, event: FeedEvent) -> bool {
        let mut guard = lock(&self.callback);
        match guard.as_mut() {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    fn close(&self) {
        lock(&self.callback).take();
    }
}

#[derive(Debug)]
struct HandleState {
    transport: Transport,
    state: ChannelState,
    reconnect_attempts: u32,
}

/// A live feed connection, either a push channel or a polling timer, both
/// driven by one task. Closing stops delivery and aborts the task, which
/// drops the channel or timer it owns.
struct ConnectionHandle {
    id: u64,
    sink: Arc<EventSink>,
    state: Arc<Mutex<HandleState>>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    fn close(self) -> u32 {
        self.sink.close();
        self.task.abort();
        let mut state = lock(&self.state);
        state.state = ChannelState::Closed;
        state.reconnect_attempts
    }

    fn status(&self, feed: &str, options: &FeedOptions) -> ConnectionStatus {
        let state = lock(&self.state);
        ConnectionStatus {
            feed: feed.to_owned(),
            transport: state.transport,
            state: state.state,
            reconnect_attempts: state.reconnect_attempts,
            max_reconnect_attempts: options.max_reconnect_attempts,
            backoff_base_ms: options.reconnect_backoff_ms,
        }
    }
}

#[derive(Default)]
struct Registry {
    feeds: HashMap<String, FeedConfig>,
    handles: HashMap<String, ConnectionHandle>,
    /// Reconnect counters of unsubscribed feeds, picked up on resubscribe.
    carried_attempts: HashMap<String, u32>,
}

struct Shared {
    executor: RequestExecutor,
    connector: Arc<dyn PushConnector>,
    options: FeedOptions,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let registry = self.registry.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in registry.handles.drain() {
            handle.close();
        }
    }
}

/// Owns every real-time feed connection of the process.
///
/// At most one connection exists per feed key: subscribing again replaces
/// (and first closes) the previous one. Clones share the same registry.
///
/// Callbacks run on runtime worker threads and must not call back into the
/// manager that invokes them.
#[derive(Clone)]
pub struct FeedManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for FeedManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedManager")
            .field("executor", &self.shared.executor)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl FeedManager {
    /// Creates a manager with the standard feeds registered.
    pub fn new(
        executor: RequestExecutor,
        connector: Arc<dyn PushConnector>,
        options: FeedOptions,
    ) -> Self {
        let manager = Self {
            shared: Arc::new(Shared {
                executor,
                connector,
                options,
                registry: Mutex::new(Registry::default()),
                next_id: AtomicU64::new(1),
            }),
        };
        for feed in FeedConfig::defaults() {
            manager.register(feed);
        }
        manager
    }

    /// Adds or replaces a feed definition. Existing connections keep
    /// their old definition until resubscribed.
    pub fn register(&self, feed: FeedConfig) {
        self.registry().feeds.insert(feed.key.clone(), feed);
    }

    pub fn options(&self) -> &FeedOptions {
        &self.shared.options
    }

    /// Starts delivering events of `feed` to `on_event`.
    ///
    /// Tries the push channel first and falls back to polling when it
    /// cannot be established. Must be called inside a Tokio runtime.
    pub fn subscribe<F>(&self, feed: &str, on_event: F) -> Result<Subscription>
    where
        F: FnMut(FeedEvent) + Send + 'static,
    {
        self.subscribe_filtered(feed, &[], on_event)
    }

    /// Like [`FeedManager::subscribe`], adding `params` (such as a server
    /// filter) to the feed's registered query parameters.
    pub fn subscribe_filtered<F>(
        &self,
        feed: &str,
        params: &[(&str, &str)],
        on_event: F,
    ) -> Result<Subscription>
    where
        F: FnMut(FeedEvent) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| OpsDeckError::Channel(format!("no async runtime: {err}")))?;

        let mut registry = self.registry();
        let mut config = registry
            .feeds
            .get(feed)
            .cloned()
            .ok_or_else(|| OpsDeckError::Channel(format!("unknown feed '{feed}'")))?;
        for (key, value) in params {
            config = config.with_param(*key, value);
        }

        let stashed = registry.carried_attempts.remove(feed);
        let carried_attempts = registry
            .handles
            .remove(feed)
            .map(ConnectionHandle::close)
            .or(stashed)
            .unwrap_or(0);

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let sink = Arc::new(EventSink::new(Box::new(on_event)));
        let state = Arc::new(Mutex::new(HandleState {
            transport: Transport::Push,
            state: ChannelState::Connecting,
            reconnect_attempts: carried_attempts,
        }));
        let driver = Driver {
            config,
            executor: self.shared.executor.clone(),
            connector: Arc::clone(&self.shared.connector),
            options: self.shared.options.clone(),
            sink: Arc::clone(&sink),
            state: Arc::clone(&state),
        };
        let task = runtime.spawn(driver.run());

        registry.handles.insert(
            feed.to_owned(),
            ConnectionHandle {
                id,
                sink,
                state,
                task,
            },
        );

        Ok(Subscription {
            id,
            feed: feed.to_owned(),
        })
    }

    /// Stops delivery and releases the connection behind `subscription`.
    ///
    /// No callback for it runs after this returns. Fails with
    /// [`OpsDeckError::SubscriptionClosed`] when the subscription was
    /// already closed or replaced by a newer one.
    pub fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        let mut registry = self.registry();
        let current = registry.handles.get(&subscription.feed).map(|handle| handle.id);
        if current != Some(subscription.id) {
            return Err(OpsDeckError::SubscriptionClosed);
        }
        if let Some(handle) = registry.handles.remove(&subscription.feed) {
            let attempts = handle.close();
            registry
                .carried_attempts
                .insert(subscription.feed.clone(), attempts);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(feed = %subscription.feed, "unsubscribed");

        Ok(())
    }

    /// Closes every connection and forgets reconnect counters.
    pub fn stop_all(&self) {
        let mut registry = self.registry();
        registry.carried_attempts.clear();
        for (_feed, handle) in registry.handles.drain() {
            handle.close();

            #[cfg(feature = "tracing")]
            tracing::info!(feed = %_feed, "stopped monitoring");
        }
    }

    pub fn status(&self, feed: &str) -> Option<ConnectionStatus> {
        let registry = self.registry();
        registry
            .handles
            .get(feed)
            .map(|handle| handle.status(feed, &self.shared.options))
    }

    /// Status of every connection, ordered by feed key.
    pub fn connection_status(&self) -> Vec<ConnectionStatus> {
        let registry = self.registry();
        let mut statuses: Vec<_> = registry
            .handles
            .iter()
            .map(|(feed, handle)| handle.status(feed, &self.shared.options))
            .collect();
        statuses.sort_by(|a, b| a.feed.cmp(&b.feed));
        statuses
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.shared.registry)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum PushEnd {
    /// The feed has never opened and this channel errored, closed or stayed
    /// silent past the grace period before opening.
    NeverOpened,
    /// The channel closed or errored; `opened` tells whether it had opened first.
    Lost { opened: bool },
}

/// Task body behind one [`ConnectionHandle`].
struct Driver {
    config: FeedConfig,
    executor: RequestExecutor,
    connector: Arc<dyn PushConnector>,
    options: FeedOptions,
    sink: Arc<EventSink>,
    state: Arc<Mutex<HandleState>>,
}

impl Driver {
    async fn run(self) {
        if self.config.push_path.is_none() {
            return self.poll().await;
        }

        let mut opened_once = false;
        loop {
            self.set_state(Transport::Push, ChannelState::Connecting);

            let channel = match self.connector.connect(&self.config) {
                Ok(channel) => channel,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        feed = %self.config.key,
                        "push channel unavailable, polling instead: {}",
                        _err
                    );
                    return self.poll().await;
                }
            };

            match self.pump(channel, opened_once).await {
                PushEnd::NeverOpened => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        feed = %self.config.key,
                        "push channel could not be established, polling instead"
                    );
                    return self.poll().await;
                }
                PushEnd::Lost { opened } => opened_once |= opened,
            }

            let attempt = lock(&self.state).reconnect_attempts;
            if attempt >= self.options.max_reconnect_attempts {
                self.set_state(Transport::Push, ChannelState::Failed);

                #[cfg(feature = "tracing")]
                tracing::error!(
                    feed = %self.config.key,
                    "max reconnection attempts reached ({})",
                    self.options.max_reconnect_attempts
                );

                self.sink.deliver(FeedEvent::error(
                    self.config.key.clone(),
                    format!(
                        "push channel failed after {} reconnect attempts",
                        self.options.max_reconnect_attempts
                    ),
                    Transport::Push,
                ));
                return;
            }

            lock(&self.state).reconnect_attempts = attempt + 1;
            let delay = self.options.reconnect_delay(attempt);

            #[cfg(feature = "tracing")]
            tracing::info!(
                feed = %self.config.key,
                "reconnecting ({}/{}) in {} ms",
                attempt + 1,
                self.options.max_reconnect_attempts,
                delay.as_millis()
            );

            sleep(delay).await;
        }
    }

    async fn pump(&self, mut channel: PushChannel, opened_once: bool) -> PushEnd {
        let grace = self.options.open_grace();
        let mut opened = false;
        loop {
            let next = if opened {
                channel.recv().await
            } else {
                match timeout(grace, channel.recv()).await {
                    Ok(next) => next,
                    Err(_) if opened_once => return PushEnd::Lost { opened: false },
                    Err(_) => return PushEnd::NeverOpened,
                }
            };

            match next {
                Some(ChannelMessage::Opened) => {
                    if !opened {
                        opened = true;
                        self.mark_open();
                    }
                }
                Some(ChannelMessage::Message { event, data }) => {
                    if !opened {
                        opened = true;
                        self.mark_open();
                    }
                    match decode_push_message(&self.config.key, event.as_deref(), &data) {
                        Ok(Some(mut event)) => {
                            if self.config.flag_anomalies && event.kind != EventKind::Error {
                                flag_anomalies(&mut event.payload);
                            }
                            self.sink.deliver(event);
                        }
                        Ok(None) => {}
                        Err(_err) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(
                                feed = %self.config.key,
                                "skipping push message: {}",
                                _err
                            );
                        }
                    }
                }
                Some(ChannelMessage::Error(_message)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(feed = %self.config.key, "push channel error: {}", _message);
                    return Self::ended(opened, opened_once);
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(feed = %self.config.key, "push channel disconnected");
                    return Self::ended(opened, opened_once);
                }
            }
        }
    }

    fn ended(opened: bool, opened_once: bool) -> PushEnd {
        if opened || opened_once {
            PushEnd::Lost { opened }
        } else {
            PushEnd::NeverOpened
        }
    }

    async fn poll(&self) {
        self.set_state(Transport::Poll, ChannelState::Open);

        #[cfg(feature = "tracing")]
        tracing::info!(
            feed = %self.config.key,
            "starting polling every {} ms",
            self.config.poll_interval.as_millis()
        );

        let mut request = RequestDescriptor::get(self.config.poll_path.clone());
        for (key, value) in &self.config.params {
            request = request.with_param(key.clone(), value);
        }
        let period = self.config.poll_interval.max(Duration::from_millis(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let event = match self.executor.execute(&request).await {
                Ok(Fetched::Live(payload)) => FeedEvent::new(
                    self.config.key.clone(),
                    EventKind::Batch,
                    payload,
                    Transport::Poll,
                ),
                Ok(Fetched::Degraded(fallback)) => {
                    FeedEvent::error(self.config.key.clone(), fallback.error, Transport::Poll)
                }
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(feed = %self.config.key, "polling error: {}", err);
                    FeedEvent::error(self.config.key.clone(), err.to_string(), Transport::Poll)
                }
            };
            self.sink.deliver(event);
        }
    }

    fn mark_open(&self) {
        let mut state = lock(&self.state);
        state.transport = Transport::Push;
        state.state = ChannelState::Open;
        state.reconnect_attempts = 0;

        #[cfg(feature = "tracing")]
        tracing::info!(feed = %self.config.key, "push channel connected");
    }

    fn set_state(&self, transport: Transport, channel_state: ChannelState) {
        let mut state = lock(&self.state);
        state.transport = transport;
        state.state = channel_state;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{EventSink, FeedConfig};
    use crate::{EventKind, FeedEvent, Transport};

    #[test]
    fn default_feeds_cover_every_collection() {
        let feeds = FeedConfig::defaults();
        let keys: Vec<_> = feeds.iter().map(|feed| feed.key.as_str()).collect();
        assert_eq!(
            keys,
            ["alerts", "metrics", "ml-analysis", "incidents", "temperature", "rca", "anomalies"]
        );
        assert!(feeds[..3].iter().all(|feed| feed.push_path.is_some()));
        assert!(feeds[3..].iter().all(|feed| feed.push_path.is_none()));
        assert_eq!(feeds[1].poll_interval.as_secs(), 5);
        assert!(feeds[1].flag_anomalies);
        assert_eq!(feeds[4].poll_path, "/temperatureData");
        assert_eq!(feeds[4].poll_interval.as_secs(), 30);
    }

    #[test]
    fn params_accumulate() {
        let feed = FeedConfig::polling("alerts", "/alerts", std::time::Duration::from_secs(10))
            .with_param("server", "srv-002");
        assert_eq!(feed.params, vec![("server".to_owned(), "srv-002".to_owned())]);
        assert!(!feed.flag_anomalies);
    }

    #[test]
    fn closed_sink_drops_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = Arc::clone(&seen);
        let sink = EventSink::new(Box::new(move |event: FeedEvent| {
            seen_in_callback.lock().unwrap().push(event.kind);
        }));

        let event = FeedEvent::new("alerts", EventKind::NewItem, json!({}), Transport::Push);
        assert!(sink.deliver(event.clone()));
        sink.close();
        assert!(!sink.deliver(event));
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::NewItem]);
    }
}
