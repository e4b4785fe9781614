use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{extract::RawQuery, routing::get, Json, Router};
use opsdeck_http::{
    Alert, ChannelMessage, ChannelState, ClientOptions, EventKind, FeedConfig, FeedEvent,
    FeedManager, FeedOptions, OpsDeckError, PushChannel, PushConnector, RequestExecutor,
    ResourceStore, Result, TemperatureReading, Transport,
};
use serde_json::{json, Value as JsonValue};
use tokio::{sync::mpsc, time::Instant};

#[derive(Clone, Copy)]
enum Mode {
    /// `connect` fails synchronously.
    Refuse,
    /// The first channel opens and then drops; every later one errors
    /// before opening.
    Break,
    /// Every channel errors before opening, like a push endpoint that
    /// answers 404.
    Reject,
    /// Channels stay silent until the test drives them.
    Hold,
}

/// Push connector whose channels are driven by the test.
struct ScriptedConnector {
    mode: Mode,
    connects: AtomicUsize,
    connected_at: Mutex<Vec<Instant>>,
    senders: Mutex<Vec<mpsc::Sender<ChannelMessage>>>,
}

impl ScriptedConnector {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            connects: AtomicUsize::new(0),
            connected_at: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
        })
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn connected_at(&self, index: usize) -> Instant {
        self.connected_at.lock().expect("connect times")[index]
    }

    /// Sender of the `index`-th channel, waiting for it to be created.
    async fn sender(&self, index: usize) -> mpsc::Sender<ChannelMessage> {
        wait_until(|| self.senders.lock().expect("senders").len() > index).await;
        self.senders.lock().expect("senders")[index].clone()
    }
}

impl PushConnector for ScriptedConnector {
    fn connect(&self, feed: &FeedConfig) -> Result<PushChannel> {
        let previous = self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected_at
            .lock()
            .expect("connect times")
            .push(Instant::now());
        match self.mode {
            Mode::Refuse => Err(OpsDeckError::Channel(format!(
                "cannot construct push channel for {}",
                feed.key
            ))),
            Mode::Break => {
                let (tx, channel) = PushChannel::pair(4);
                if previous == 0 {
                    tx.try_send(ChannelMessage::Opened)
                        .expect("fresh channel has room");
                }
                tx.try_send(ChannelMessage::Error("connection reset".to_owned()))
                    .expect("fresh channel has room");
                Ok(channel)
            }
            Mode::Reject => {
                let (tx, channel) = PushChannel::pair(4);
                tx.try_send(ChannelMessage::Error(
                    "push endpoint returned 404 Not Found".to_owned(),
                ))
                .expect("fresh channel has room");
                Ok(channel)
            }
            Mode::Hold => {
                let (tx, channel) = PushChannel::pair(16);
                self.senders.lock().expect("senders").push(tx);
                Ok(channel)
            }
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition must become true");
}

fn collector() -> (
    impl FnMut(FeedEvent) + Send + 'static,
    mpsc::UnboundedReceiver<FeedEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |event: FeedEvent| {
            let _ = tx.send(event);
        },
        rx,
    )
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<FeedEvent>) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event must arrive in time")
        .expect("feed must still be delivering")
}

fn fast_feed_options(max_reconnect_attempts: u32) -> FeedOptions {
    FeedOptions {
        max_reconnect_attempts,
        reconnect_backoff_ms: 1,
        open_grace_ms: 1_000,
    }
}

fn unused_executor() -> RequestExecutor {
    RequestExecutor::new("http://127.0.0.1:9")
}

fn manager(connector: Arc<ScriptedConnector>, options: FeedOptions) -> FeedManager {
    FeedManager::new(unused_executor(), connector, options)
}

/// REST collections served to polling feeds; records each query string.
struct RestApi {
    base_url: String,
    queries: Arc<Mutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl RestApi {
    fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("queries").clone()
    }
}

fn collection(queries: &Arc<Mutex<Vec<String>>>, body: JsonValue) -> axum::routing::MethodRouter {
    let queries = queries.clone();
    get(move |RawQuery(query): RawQuery| {
        let queries = queries.clone();
        let body = body.clone();
        async move {
            queries
                .lock()
                .expect("queries")
                .push(query.unwrap_or_default());
            Json(body)
        }
    })
}

async fn spawn_rest_api() -> RestApi {
    let queries = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route(
            "/alerts",
            collection(&queries, json!([{"id": 1, "status": "active"}])),
        )
        .route(
            "/metrics",
            collection(&queries, json!([{"id": "m1", "server": "srv-002"}])),
        )
        .route(
            "/temperatureData",
            collection(
                &queries,
                json!([
                    {"id": 1, "fridgeId": "FR-001", "temperature": 4.2, "status": "normal"},
                    {"id": 2, "fridgeId": "FR-002", "temperature": 8.6, "status": "alarm"}
                ]),
            ),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });
    RestApi {
        base_url: format!("http://{address}"),
        queries,
        task,
    }
}

#[tokio::test]
async fn construction_failure_falls_back_to_polling() {
    let server = spawn_rest_api().await;
    let executor = RequestExecutor::new(server.base_url.clone()).with_options(ClientOptions {
        max_retries: 0,
        ..ClientOptions::default()
    });
    let connector = ScriptedConnector::new(Mode::Refuse);
    let feeds = FeedManager::new(executor, connector.clone(), fast_feed_options(5));
    feeds.register(
        FeedConfig::polling("alerts", "/alerts", Duration::from_millis(100))
            .with_push("/sse/alerts"),
    );

    let (on_event, mut rx) = collector();
    let _subscription = feeds.subscribe("alerts", on_event).expect("subscribe");

    let event = next_event(&mut rx).await;
    assert_eq!(event.source, Transport::Poll);
    assert_eq!(event.kind, EventKind::Batch);
    assert_eq!(event.payload, json!([{"id": 1, "status": "active"}]));
    assert_eq!(connector.connects(), 1);

    let status = feeds.status("alerts").expect("status");
    assert_eq!(status.transport, Transport::Poll);
    assert_eq!(status.state, ChannelState::Open);

    let second = next_event(&mut rx).await;
    assert_eq!(second.source, Transport::Poll);
    server.task.abort();
}

#[tokio::test]
async fn reconnect_budget_is_bounded() {
    let connector = ScriptedConnector::new(Mode::Break);
    let feeds = manager(connector.clone(), fast_feed_options(3));

    let (on_event, mut rx) = collector();
    let _subscription = feeds.subscribe("alerts", on_event).expect("subscribe");

    let event = next_event(&mut rx).await;
    assert_eq!(event.kind, EventKind::Error);
    assert_eq!(event.source, Transport::Push);

    let status = feeds.status("alerts").expect("status");
    assert_eq!(status.state, ChannelState::Failed);
    assert_eq!(status.reconnect_attempts, 3);
    assert_eq!(status.max_reconnect_attempts, 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.connects(), 4);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn push_messages_are_delivered_until_unsubscribe() {
    let connector = ScriptedConnector::new(Mode::Hold);
    let feeds = manager(connector.clone(), fast_feed_options(5));

    let (on_event, mut rx) = collector();
    let subscription = feeds.subscribe("alerts", on_event).expect("subscribe");
    let tx = connector.sender(0).await;

    tx.send(ChannelMessage::Opened).await.expect("send");
    tx.send(ChannelMessage::Message {
        event: None,
        data: r#"{"type":"new_alert","payload":{"id":"a1","severity":"critical"}}"#.to_owned(),
    })
    .await
    .expect("send");

    let event = next_event(&mut rx).await;
    assert_eq!(event.kind, EventKind::NewItem);
    assert_eq!(event.source, Transport::Push);
    assert_eq!(event.payload["id"], "a1");
    assert_eq!(feeds.status("alerts").expect("status").state, ChannelState::Open);

    feeds.unsubscribe(subscription).expect("unsubscribe");
    let _ = tx
        .send(ChannelMessage::Message {
            event: Some("alert_updated".to_owned()),
            data: r#"{"id":"a1"}"#.to_owned(),
        })
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert!(feeds.status("alerts").is_none());
}

#[tokio::test]
async fn opening_resets_reconnect_attempts() {
    let connector = ScriptedConnector::new(Mode::Hold);
    let feeds = manager(connector.clone(), fast_feed_options(5));

    let (on_event, _rx) = collector();
    let _subscription = feeds.subscribe("metrics", on_event).expect("subscribe");

    let first = connector.sender(0).await;
    first.send(ChannelMessage::Opened).await.expect("send");
    first
        .send(ChannelMessage::Error("connection reset".to_owned()))
        .await
        .expect("send");

    let second = connector.sender(1).await;
    let status = feeds.status("metrics").expect("status");
    assert_eq!(status.reconnect_attempts, 1);
    assert_eq!(status.state, ChannelState::Connecting);

    second.send(ChannelMessage::Opened).await.expect("send");
    wait_until(|| {
        feeds
            .status("metrics")
            .is_some_and(|status| status.state == ChannelState::Open)
    })
    .await;
    assert_eq!(feeds.status("metrics").expect("status").reconnect_attempts, 0);
}

#[tokio::test]
async fn resubscribing_replaces_the_previous_connection() {
    let connector = ScriptedConnector::new(Mode::Hold);
    let feeds = manager(connector.clone(), fast_feed_options(5));

    let (first_callback, mut first_rx) = collector();
    let first = feeds.subscribe("alerts", first_callback).expect("subscribe");
    let first_tx = connector.sender(0).await;

    let (second_callback, mut second_rx) = collector();
    let second = feeds.subscribe("alerts", second_callback).expect("resubscribe");
    let second_tx = connector.sender(1).await;

    wait_until(|| first_tx.is_closed()).await;
    second_tx
        .send(ChannelMessage::Message {
            event: Some("new_alert".to_owned()),
            data: r#"{"id":"a2"}"#.to_owned(),
        })
        .await
        .expect("send");

    assert_eq!(next_event(&mut second_rx).await.payload["id"], "a2");
    assert!(first_rx.try_recv().is_err());
    assert_eq!(feeds.connection_status().len(), 1);

    assert!(matches!(
        feeds.unsubscribe(first),
        Err(OpsDeckError::SubscriptionClosed)
    ));
    feeds.unsubscribe(second).expect("current subscription");
}

#[tokio::test]
async fn never_opening_channel_falls_back_after_grace() {
    let server = spawn_rest_api().await;
    let connector = ScriptedConnector::new(Mode::Hold);
    let feeds = FeedManager::new(
        RequestExecutor::new(server.base_url.clone()),
        connector.clone(),
        FeedOptions {
            open_grace_ms: 30,
            ..fast_feed_options(5)
        },
    );
    feeds.register(
        FeedConfig::polling("alerts", "/alerts", Duration::from_millis(100))
            .with_push("/sse/alerts"),
    );

    let (on_event, mut rx) = collector();
    let _subscription = feeds.subscribe("alerts", on_event).expect("subscribe");

    let event = next_event(&mut rx).await;
    assert_eq!(event.source, Transport::Poll);
    assert_eq!(connector.connects(), 1);
    server.task.abort();
}

#[tokio::test]
async fn rejected_push_endpoint_falls_back_to_polling() {
    let server = spawn_rest_api().await;
    let connector = ScriptedConnector::new(Mode::Reject);
    let feeds = FeedManager::new(
        RequestExecutor::new(server.base_url.clone()),
        connector.clone(),
        fast_feed_options(3),
    );

    let (on_event, mut rx) = collector();
    let _subscription = feeds.subscribe("alerts", on_event).expect("subscribe");

    let event = next_event(&mut rx).await;
    assert_eq!(event.source, Transport::Poll);
    assert_eq!(event.kind, EventKind::Batch);

    let status = feeds.status("alerts").expect("status");
    assert_eq!(status.transport, Transport::Poll);
    assert_eq!(status.state, ChannelState::Open);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(connector.connects(), 1);
    server.task.abort();
}

#[tokio::test(start_paused = true)]
async fn reconnect_delay_doubles_from_the_base() {
    let connector = ScriptedConnector::new(Mode::Hold);
    let feeds = manager(
        connector.clone(),
        FeedOptions {
            max_reconnect_attempts: 5,
            reconnect_backoff_ms: 1_000,
            open_grace_ms: 60_000,
        },
    );

    let (on_event, _rx) = collector();
    let _subscription = feeds.subscribe("alerts", on_event).expect("subscribe");

    let first = connector.sender(0).await;
    first.send(ChannelMessage::Opened).await.expect("send");
    first
        .send(ChannelMessage::Error("connection reset".to_owned()))
        .await
        .expect("send");
    let dropped_at = Instant::now();

    let second = connector.sender(1).await;
    let gap = connector.connected_at(1) - dropped_at;
    assert!(
        gap >= Duration::from_millis(1_000) && gap < Duration::from_millis(1_100),
        "{gap:?}"
    );

    second
        .send(ChannelMessage::Error("connection reset".to_owned()))
        .await
        .expect("send");
    let dropped_at = Instant::now();

    connector.sender(2).await;
    let gap = connector.connected_at(2) - dropped_at;
    assert!(
        gap >= Duration::from_millis(2_000) && gap < Duration::from_millis(2_100),
        "{gap:?}"
    );
    assert_eq!(feeds.status("alerts").expect("status").reconnect_attempts, 2);
}

#[tokio::test]
async fn filtered_subscription_sends_params_when_polling() {
    let server = spawn_rest_api().await;
    let connector = ScriptedConnector::new(Mode::Refuse);
    let feeds = FeedManager::new(
        RequestExecutor::new(server.base_url.clone()),
        connector,
        fast_feed_options(3),
    );

    let (on_event, mut rx) = collector();
    let _subscription = feeds
        .subscribe_filtered("metrics", &[("server", "srv-002")], on_event)
        .expect("subscribe");

    let event = next_event(&mut rx).await;
    assert_eq!(event.source, Transport::Poll);
    assert_eq!(event.payload[0]["server"], "srv-002");
    assert_eq!(server.queries(), ["server=srv-002"]);
    server.task.abort();
}

#[tokio::test]
async fn polling_only_store_subscription_receives_batches() {
    let server = spawn_rest_api().await;
    let connector = ScriptedConnector::new(Mode::Hold);
    let feeds = FeedManager::new(
        RequestExecutor::new(server.base_url.clone()),
        connector.clone(),
        fast_feed_options(3),
    );
    let temperatures: ResourceStore<TemperatureReading> =
        ResourceStore::new(unused_executor());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = temperatures
        .subscribe(&feeds, move |event, snapshot| {
            let _ = tx.send((event.kind, event.source, snapshot.items.len()));
        })
        .expect("temperature readings have a feed");

    let (kind, source, len) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("callback must run")
        .expect("store subscription alive");
    assert_eq!((kind, source, len), (EventKind::Batch, Transport::Poll, 2));
    assert_eq!(
        temperatures.snapshot().items[1].fridge_id.as_deref(),
        Some("FR-002")
    );
    assert_eq!(connector.connects(), 0);
    server.task.abort();
}

#[tokio::test]
async fn metric_push_events_carry_anomaly_flags() {
    let connector = ScriptedConnector::new(Mode::Hold);
    let feeds = manager(connector.clone(), fast_feed_options(5));

    let (on_event, mut rx) = collector();
    let _subscription = feeds.subscribe("metrics", on_event).expect("subscribe");
    let tx = connector.sender(0).await;
    tx.send(ChannelMessage::Message {
        event: None,
        data: r#"{"type":"metrics_update","payload":{"cpu":95,"memory":40}}"#.to_owned(),
    })
    .await
    .expect("send");

    let event = next_event(&mut rx).await;
    assert_eq!(event.kind, EventKind::ItemUpdated);
    assert_eq!(event.payload["cpu"], 95);
    assert_eq!(event.payload["anomaly_detected"][0]["type"], "cpu_spike");
    assert_eq!(event.payload["anomaly_detected"][0]["severity"], "high");
}

#[tokio::test]
async fn unknown_feed_is_rejected() {
    let feeds = manager(ScriptedConnector::new(Mode::Hold), FeedOptions::default());
    let (on_event, _rx) = collector();
    assert!(matches!(
        feeds.subscribe("weather", on_event),
        Err(OpsDeckError::Channel(_))
    ));
}

#[tokio::test]
async fn store_subscription_folds_events_before_callback() {
    let connector = ScriptedConnector::new(Mode::Hold);
    let feeds = manager(connector.clone(), fast_feed_options(5));
    let alerts: ResourceStore<Alert> = ResourceStore::new(unused_executor());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = alerts
        .subscribe(&feeds, move |event, snapshot| {
            let _ = tx.send((event.kind, snapshot.items.len()));
        })
        .expect("subscribe");

    let channel = connector.sender(0).await;
    channel
        .send(ChannelMessage::Message {
            event: Some("new_alert".to_owned()),
            data: r#"{"id":"a9","status":"active","severity":"critical"}"#.to_owned(),
        })
        .await
        .expect("send");

    let (kind, len) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("callback must run")
        .expect("store subscription alive");
    assert_eq!(kind, EventKind::NewItem);
    assert_eq!(len, 1);
    assert_eq!(alerts.snapshot().items[0].id, "a9");
}

#[tokio::test]
async fn reconnect_count_survives_resubscribe() {
    let connector = ScriptedConnector::new(Mode::Hold);
    let feeds = manager(connector.clone(), fast_feed_options(5));

    let (on_event, _rx) = collector();
    let subscription = feeds.subscribe("alerts", on_event).expect("subscribe");
    let first = connector.sender(0).await;
    first.send(ChannelMessage::Opened).await.expect("send");
    first
        .send(ChannelMessage::Error("connection reset".to_owned()))
        .await
        .expect("send");
    connector.sender(1).await;
    feeds.unsubscribe(subscription).expect("unsubscribe");

    let (on_event, _rx) = collector();
    let _subscription = feeds.subscribe("alerts", on_event).expect("resubscribe");
    assert_eq!(feeds.status("alerts").expect("status").reconnect_attempts, 1);

    feeds.stop_all();
    let (on_event, _rx) = collector();
    let _subscription = feeds.subscribe("alerts", on_event).expect("subscribe after stop");
    assert_eq!(feeds.status("alerts").expect("status").reconnect_attempts, 0);
}
