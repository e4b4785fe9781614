use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::{executor::Auth, request::join_url, RequestExecutor};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
}

/// A backend answering `GET <base_url>/health`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceProbe {
    pub name: String,
    pub base_url: String,
}

impl ServiceProbe {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub endpoint: String,
    pub status: HealthStatus,
    /// Round trip of a successful probe.
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `Healthy` only when every service is.
    pub overall: OverallHealth,
    pub services: Vec<ServiceHealth>,
    pub mock_mode: bool,
    pub timestamp: DateTime<Utc>,
}

/// Probes every tracked service and folds the results into one report.
#[derive(Clone, Debug)]
pub struct HealthAggregator {
    http: reqwest::Client,
    auth: Auth,
    probes: Vec<ServiceProbe>,
    timeout: Duration,
    mock_mode: bool,
}

impl HealthAggregator {
    pub fn new(mock_mode: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth: Auth::None,
            probes: Vec::new(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            mock_mode,
        }
    }

    /// Shares the executor's HTTP client and credentials.
    pub fn from_executor(executor: &RequestExecutor, mock_mode: bool) -> Self {
        Self {
            http: executor.http().clone(),
            auth: executor.auth().clone(),
            ..Self::new(mock_mode)
        }
    }

    pub fn with_probe(mut self, probe: ServiceProbe) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn probes(&self) -> &[ServiceProbe] {
        &self.probes
    }

    /// Probes each service in order. Failures are recorded, never returned.
    pub async fn check_health(&self) -> HealthReport {
        let mut services = Vec::with_capacity(self.probes.len());
        for probe in &self.probes {
            services.push(self.probe(probe).await);
        }

        let overall = if services
            .iter()
            .all(|service| service.status == HealthStatus::Healthy)
        {
            OverallHealth::Healthy
        } else {
            OverallHealth::Degraded
        };

        HealthReport {
            overall,
            services,
            mock_mode: self.mock_mode,
            timestamp: Utc::now(),
        }
    }

    async fn probe(&self, probe: &ServiceProbe) -> ServiceHealth {
        let endpoint = join_url(&probe.base_url, "/health");
        let started = Instant::now();
        let outcome = self
            .auth
            .apply(self.http.get(&endpoint))
            .timeout(self.timeout)
            .send()
            .await;

        let error = match outcome {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => Some(format!("health endpoint returned {}", response.status())),
            Err(err) => Some(err.to_string()),
        };

        match error {
            None => ServiceHealth {
                name: probe.name.clone(),
                endpoint,
                status: HealthStatus::Healthy,
                latency_ms: Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
                error: None,
            },
            Some(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(service = %probe.name, "health probe failed: {}", error);

                ServiceHealth {
                    name: probe.name.clone(),
                    endpoint,
                    status: HealthStatus::Unhealthy,
                    latency_ms: None,
                    error: Some(error),
                }
            }
        }
    }

    /// Re-checks health every `period` in the background.
    ///
    /// The first check runs immediately. Must be called inside a Tokio runtime.
    pub fn spawn_monitor(&self, period: Duration) -> HealthMonitor {
        let (tx, rx) = watch::channel(None);
        let aggregator = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = aggregator.check_health().await;
                if tx.send(Some(report)).is_err() {
                    return;
                }
            }
        });
        HealthMonitor { rx, task }
    }
}

/// Handle on a background health loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct HealthMonitor {
    rx: watch::Receiver<Option<HealthReport>>,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Most recent report, if a check has completed.
    pub fn latest(&self) -> Option<HealthReport> {
        self.rx.borrow().clone()
    }

    /// Waits for the next report.
    pub async fn next_report(&mut self) -> Option<HealthReport> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
