//! Records served by the dashboard API.
//!
//! Every model tolerates missing fields and keeps unknown ones in `extra`, so
//! records survive a fetch/update round trip unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::Resource;

/// json-server ids are numbers or strings; both are kept as strings.
mod flexible_id {
    use serde::{de::Error, Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(id) => Ok(id),
            Value::Number(id) => Ok(id.to_string()),
            Value::Null => Ok(String::new()),
            other => Err(D::Error::custom(format!("invalid id: {other}"))),
        }
    }
}

pub(crate) fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Alert {
    #[serde(
        deserialize_with = "flexible_id::deserialize",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    pub title: Option<String>,
    pub message: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub timestamp: Option<String>,
    pub resolved_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Alert {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.timestamp.as_deref())
    }

    pub fn is_active(&self) -> bool {
        self.status.as_deref() == Some("active")
    }

    pub fn has_severity(&self, severity: &str) -> bool {
        self.severity
            .as_deref()
            .is_some_and(|value| value.eq_ignore_ascii_case(severity))
    }
}

impl Resource for Alert {
    const COLLECTION: &'static str = "alerts";
    const FEED: Option<&'static str> = Some("alerts");

    fn id(&self) -> &str {
        &self.id
    }

    fn mark_resolved(&mut self) {
        self.status = Some("resolved".to_owned());
        self.resolved_at = Some(Utc::now().to_rfc3339());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricSample {
    #[serde(
        deserialize_with = "flexible_id::deserialize",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    #[serde(rename = "diskIO")]
    pub disk_io: f64,
    pub latency: f64,
    #[serde(rename = "networkIO")]
    pub network_io: Option<f64>,
    pub server: Option<String>,
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetricSample {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.timestamp.as_deref())
    }
}

impl Resource for MetricSample {
    const COLLECTION: &'static str = "metrics";
    const FEED: Option<&'static str> = Some("metrics");
    const RETAIN: Option<usize> = Some(100);

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Incident {
    #[serde(
        deserialize_with = "flexible_id::deserialize",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    /// Hours taken to resolve.
    pub resolution_time: Option<f64>,
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource for Incident {
    const COLLECTION: &'static str = "incidents";
    const FEED: Option<&'static str> = Some("incidents");

    fn id(&self) -> &str {
        &self.id
    }

    fn mark_resolved(&mut self) {
        self.status = Some("resolved".to_owned());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TemperatureReading {
    #[serde(
        deserialize_with = "flexible_id::deserialize",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    pub fridge_id: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    /// Degrees Celsius.
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub target_temp: Option<f64>,
    pub status: Option<String>,
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource for TemperatureReading {
    const COLLECTION: &'static str = "temperatureData";
    const FEED: Option<&'static str> = Some("temperature");

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RcaFlow {
    #[serde(
        deserialize_with = "flexible_id::deserialize",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    pub title: Option<String>,
    pub incident_id: Option<String>,
    pub status: Option<String>,
    pub root_cause: Option<String>,
    pub confidence: Option<f64>,
    pub recommendations: Vec<Value>,
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource for RcaFlow {
    const COLLECTION: &'static str = "rcaFlows";
    const FEED: Option<&'static str> = Some("rca");

    fn id(&self) -> &str {
        &self.id
    }

    fn mark_resolved(&mut self) {
        self.status = Some("completed".to_owned());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Anomaly {
    #[serde(
        deserialize_with = "flexible_id::deserialize",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    pub metric: Option<String>,
    pub severity: Option<String>,
    pub score: Option<f64>,
    pub algorithm: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub detected_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource for Anomaly {
    const COLLECTION: &'static str = "anomalies";
    const FEED: Option<&'static str> = Some("anomalies");

    fn id(&self) -> &str {
        &self.id
    }

    fn mark_resolved(&mut self) {
        self.status = Some("resolved".to_owned());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AiSummary {
    #[serde(
        deserialize_with = "flexible_id::deserialize",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource for AiSummary {
    const COLLECTION: &'static str = "aiSummaries";
    const FEED: Option<&'static str> = Some("ml-analysis");

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AiSummary, Alert, Anomaly, Incident, MetricSample, RcaFlow, TemperatureReading};
    use crate::store::Resource;

    #[test]
    fn alert_accepts_numeric_ids_and_keeps_unknown_fields() {
        let alert: Alert = serde_json::from_value(json!({
            "id": 3,
            "type": "temperature",
            "severity": "critical",
            "status": "active",
            "assignedTo": "ops-team"
        }))
        .unwrap();

        assert_eq!(alert.id, "3");
        assert_eq!(alert.kind.as_deref(), Some("temperature"));
        assert_eq!(alert.extra["assignedTo"], "ops-team");

        let back = serde_json::to_value(&alert).unwrap();
        assert_eq!(back["assignedTo"], "ops-team");
        assert_eq!(back["type"], "temperature");
    }

    #[test]
    fn missing_id_is_not_serialized() {
        let value = serde_json::to_value(Alert::default()).unwrap();
        assert!(value.get("id").is_none());
    }

    #[test]
    fn metric_field_names_match_api() {
        let sample: MetricSample = serde_json::from_value(json!({
            "id": "m1", "cpuUsage": 22, "memoryUsage": 48, "diskIO": 11, "latency": 120,
            "timestamp": "2025-08-04T09:45:00Z"
        }))
        .unwrap();
        assert_eq!(sample.cpu_usage, 22.0);
        assert_eq!(sample.disk_io, 11.0);
        assert!(sample.timestamp().is_some());
        assert_eq!(MetricSample::RETAIN, Some(100));
    }

    #[test]
    fn every_collection_has_a_feed() {
        let feeds = [
            Alert::FEED,
            MetricSample::FEED,
            Incident::FEED,
            TemperatureReading::FEED,
            RcaFlow::FEED,
            Anomaly::FEED,
            AiSummary::FEED,
        ];
        assert!(feeds.iter().all(Option::is_some));
        assert_eq!(TemperatureReading::FEED, Some("temperature"));
    }

    #[test]
    fn resolving_an_alert_sets_status_and_time() {
        let mut alert = Alert {
            id: "a".to_owned(),
            status: Some("active".to_owned()),
            ..Alert::default()
        };
        alert.mark_resolved();
        assert_eq!(alert.status.as_deref(), Some("resolved"));
        assert!(alert.resolved_at.is_some());
    }
}
