use std::fmt;
use std::sync::Arc;

use crate::{
    AiSummary, Alert, Anomaly, ClientOptions, Config, FeedManager, FeedOptions, HealthAggregator,
    HealthReport, Incident, MetricSample, RcaFlow, RequestExecutor, ResourceStore, Result,
    ServiceProbe, SseConnector, TemperatureReading,
};

/// Name of the REST backend in health reports.
pub const API_SERVICE_NAME: &str = "Mock API";

/// Everything a dashboard needs, wired from one [`Config`].
///
/// Stores, feeds and health checks share the executor, so they share the
/// HTTP connection pool, credentials and retry policy.
#[derive(Clone)]
pub struct OpsDeckClient {
    config: Config,
    executor: RequestExecutor,
    feeds: FeedManager,
    health: HealthAggregator,
    alerts: ResourceStore<Alert>,
    metrics: ResourceStore<MetricSample>,
    incidents: ResourceStore<Incident>,
    temperature: ResourceStore<TemperatureReading>,
    rca_flows: ResourceStore<RcaFlow>,
    anomalies: ResourceStore<Anomaly>,
    ai_summaries: ResourceStore<AiSummary>,
}

impl fmt::Debug for OpsDeckClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpsDeckClient")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl OpsDeckClient {
    /// Builds a client from `OPSDECK_*` environment variables.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use opsdeck_http::OpsDeckClient;
    ///
    /// # async fn run() -> opsdeck_http::Result<()> {
    /// let client = OpsDeckClient::from_env()?;
    /// let alerts = client.alerts().fetch_all().await;
    /// println!("{} alerts", alerts.items.len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::from_env()?))
    }

    pub fn new(config: Config) -> Self {
        Self::with_options(config, ClientOptions::default(), FeedOptions::default())
    }

    /// `config.degraded_mode` turns the GET fallback on regardless of `options`.
    pub fn with_options(config: Config, options: ClientOptions, feed_options: FeedOptions) -> Self {
        let options = ClientOptions {
            degraded_fallback: options.degraded_fallback || config.degraded_mode,
            ..options
        };
        let executor = RequestExecutor::new(config.api_url.clone())
            .with_options(options)
            .with_auth(config.auth());

        let connector = SseConnector::from_executor(&executor, config.push_url.clone());
        let feeds = FeedManager::new(executor.clone(), Arc::new(connector), feed_options);
        let health = HealthAggregator::from_executor(&executor, config.use_mock_data)
            .with_probe(ServiceProbe::new(API_SERVICE_NAME, config.api_url.clone()));

        #[cfg(feature = "tracing")]
        tracing::info!(
            api_url = %config.api_url,
            push_url = %config.push_url,
            mode = ?config.api_mode,
            "opsdeck client ready"
        );

        Self {
            alerts: ResourceStore::new(executor.clone()),
            metrics: ResourceStore::new(executor.clone()),
            incidents: ResourceStore::new(executor.clone()),
            temperature: ResourceStore::new(executor.clone()),
            rca_flows: ResourceStore::new(executor.clone()),
            anomalies: ResourceStore::new(executor.clone()),
            ai_summaries: ResourceStore::new(executor.clone()),
            config,
            executor,
            feeds,
            health,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn feeds(&self) -> &FeedManager {
        &self.feeds
    }

    pub fn health(&self) -> &HealthAggregator {
        &self.health
    }

    pub async fn check_health(&self) -> HealthReport {
        self.health.check_health().await
    }

    pub fn alerts(&self) -> &ResourceStore<Alert> {
        &self.alerts
    }

    pub fn metrics(&self) -> &ResourceStore<MetricSample> {
        &self.metrics
    }

    pub fn incidents(&self) -> &ResourceStore<Incident> {
        &self.incidents
    }

    pub fn temperature(&self) -> &ResourceStore<TemperatureReading> {
        &self.temperature
    }

    pub fn rca_flows(&self) -> &ResourceStore<RcaFlow> {
        &self.rca_flows
    }

    pub fn anomalies(&self) -> &ResourceStore<Anomaly> {
        &self.anomalies
    }

    pub fn ai_summaries(&self) -> &ResourceStore<AiSummary> {
        &self.ai_summaries
    }

    /// Closes every feed subscription.
    pub fn shutdown(&self) {
        self.feeds.stop_all();
    }
}
