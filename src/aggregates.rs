//! Read-only figures derived from cached snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{models::parse_timestamp, Alert, Incident, MetricSample, TemperatureReading};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub active: usize,
    /// Active and critical.
    pub critical: usize,
    /// Active and warning.
    pub warning: usize,
    pub resolved: usize,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        let mut summary = Self {
            total: alerts.len(),
            ..Self::default()
        };
        for alert in alerts {
            match alert.status.as_deref() {
                Some("active") => {
                    summary.active += 1;
                    if alert.has_severity("critical") {
                        summary.critical += 1;
                    }
                    if alert.has_severity("warning") {
                        summary.warning += 1;
                    }
                }
                Some("resolved") => summary.resolved += 1,
                _ => {}
            }
        }
        summary
    }
}

/// Active alerts, newest first, at most `limit`.
pub fn recent_active_alerts(alerts: &[Alert], limit: usize) -> Vec<&Alert> {
    let mut active: Vec<_> = alerts.iter().filter(|alert| alert.is_active()).collect();
    active.sort_by_key(|alert| std::cmp::Reverse(alert.timestamp()));
    active.truncate(limit);
    active
}

pub fn alerts_by_type(alerts: &[Alert]) -> BTreeMap<String, Vec<&Alert>> {
    let mut grouped: BTreeMap<String, Vec<&Alert>> = BTreeMap::new();
    for alert in alerts {
        let kind = alert.kind.clone().unwrap_or_else(|| "unknown".to_owned());
        grouped.entry(kind).or_default().push(alert);
    }
    grouped
}

/// Criteria for [`AlertFilter::apply`]. Empty lists and `None` match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlertFilter {
    /// `Some("all")` is the same as `None`.
    pub kind: Option<String>,
    pub severities: Vec<String>,
    pub statuses: Vec<String>,
    /// Case-insensitive substring of the alert source.
    pub source: Option<String>,
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl AlertFilter {
    pub fn apply<'a>(&self, alerts: &'a [Alert]) -> Vec<&'a Alert> {
        alerts.iter().filter(|alert| self.matches(alert)).collect()
    }

    fn matches(&self, alert: &Alert) -> bool {
        if let Some(kind) = self.kind.as_deref().filter(|kind| *kind != "all") {
            if alert.kind.as_deref() != Some(kind) {
                return false;
            }
        }
        if !self.severities.is_empty()
            && !alert
                .severity
                .as_ref()
                .is_some_and(|severity| self.severities.contains(severity))
        {
            return false;
        }
        if !self.statuses.is_empty()
            && !alert
                .status
                .as_ref()
                .is_some_and(|status| self.statuses.contains(status))
        {
            return false;
        }
        if let Some(needle) = &self.source {
            let needle = needle.to_lowercase();
            if !alert
                .source
                .as_deref()
                .is_some_and(|source| source.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
        if let Some((start, end)) = self.range {
            if !alert
                .timestamp()
                .is_some_and(|at| at >= start && at <= end)
            {
                return false;
            }
        }
        true
    }
}

/// Percent change of alerts raised in the last 24 h versus the 24 h before.
///
/// With no alerts in the previous window the trend is 100 if any arrived
/// recently, else 0.
pub fn alert_trend(alerts: &[Alert], now: DateTime<Utc>) -> i64 {
    let one_day_ago = now - Duration::hours(24);
    let two_days_ago = now - Duration::hours(48);
    let mut recent = 0i64;
    let mut previous = 0i64;
    for at in alerts.iter().filter_map(Alert::timestamp) {
        if at > one_day_ago {
            recent += 1;
        } else if at > two_days_ago {
            previous += 1;
        }
    }
    if previous == 0 {
        return if recent > 0 { 100 } else { 0 };
    }
    ((recent - previous) as f64 / previous as f64 * 100.0).round() as i64
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct MetricAverages {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_io: f64,
    /// Rounded to whole milliseconds.
    pub latency: f64,
}

impl MetricAverages {
    /// Averages rounded to one decimal. All zero for an empty slice.
    pub fn from_samples(samples: &[MetricSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let mean = |field: fn(&MetricSample) -> f64| samples.iter().map(field).sum::<f64>() / n;
        Self {
            cpu_usage: round1(mean(|s| s.cpu_usage)),
            memory_usage: round1(mean(|s| s.memory_usage)),
            disk_io: round1(mean(|s| s.disk_io)),
            latency: mean(|s| s.latency).round(),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Unknown,
    Good,
    Warning,
    Critical,
}

fn band(value: f64, warning: f64, critical: f64) -> SystemHealth {
    if value < warning {
        SystemHealth::Good
    } else if value < critical {
        SystemHealth::Warning
    } else {
        SystemHealth::Critical
    }
}

/// Worst of the cpu (70/85), memory (80/90) and latency (200/500) bands of
/// the latest sample.
pub fn system_health(samples: &[MetricSample]) -> SystemHealth {
    let Some(latest) = samples.last() else {
        return SystemHealth::Unknown;
    };
    [
        band(latest.cpu_usage, 70.0, 85.0),
        band(latest.memory_usage, 80.0, 90.0),
        band(latest.latency, 200.0, 500.0),
    ]
    .into_iter()
    .max()
    .unwrap_or(SystemHealth::Unknown)
}

/// 0-100 score from the latest sample; 95 when there is none.
pub fn overall_health_score(samples: &[MetricSample]) -> u8 {
    let Some(latest) = samples.last() else {
        return 95;
    };
    let cpu = (100.0 - latest.cpu_usage).max(0.0);
    let memory = (100.0 - latest.memory_usage).max(0.0);
    let disk = (100.0 - latest.disk_io).max(0.0);
    let latency = (100.0 - latest.latency / 10.0).clamp(0.0, 100.0);
    ((cpu + memory + disk + latency) / 4.0).round().clamp(0.0, 100.0) as u8
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Stable,
    Increasing,
    Decreasing,
}

/// Direction of `field` over the last ten samples; changes under 5 % are stable.
pub fn metric_trend(samples: &[MetricSample], field: fn(&MetricSample) -> f64) -> Trend {
    let recent = &samples[samples.len().saturating_sub(10)..];
    let (Some(first), Some(last)) = (recent.first(), recent.last()) else {
        return Trend::Stable;
    };
    if recent.len() < 2 {
        return Trend::Stable;
    }
    let (first, last) = (field(first), field(last));
    if first == 0.0 {
        return if last > 0.0 {
            Trend::Increasing
        } else {
            Trend::Stable
        };
    }
    let change = (last - first) / first * 100.0;
    if change.abs() < 5.0 {
        Trend::Stable
    } else if change > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTrend {
    Optimal,
    Stable,
    Degrading,
}

/// Based on the mean cpu and memory of the last three samples.
pub fn performance_trend(samples: &[MetricSample]) -> PerformanceTrend {
    if samples.len() < 2 {
        return PerformanceTrend::Stable;
    }
    let recent = &samples[samples.len().saturating_sub(3)..];
    let averages = MetricAverages::from_samples(recent);
    if averages.cpu_usage > 70.0 || averages.memory_usage > 80.0 {
        PerformanceTrend::Degrading
    } else if averages.cpu_usage < 30.0 && averages.memory_usage < 50.0 {
        PerformanceTrend::Optimal
    } else {
        PerformanceTrend::Stable
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThresholdBreach {
    pub metric: String,
    pub level: Level,
    pub value: f64,
    pub threshold: f64,
}

/// Compares the latest sample with per-metric thresholds.
///
/// Metric names are the API's: `cpuUsage`, `memoryUsage`, `diskIO`, `latency`.
pub fn check_thresholds(
    samples: &[MetricSample],
    thresholds: &BTreeMap<String, Threshold>,
) -> Vec<ThresholdBreach> {
    let Some(latest) = samples.last() else {
        return Vec::new();
    };
    thresholds
        .iter()
        .filter_map(|(metric, threshold)| {
            let value = metric_value(latest, metric)?;
            let (level, limit) = if value > threshold.critical {
                (Level::Critical, threshold.critical)
            } else if value > threshold.warning {
                (Level::Warning, threshold.warning)
            } else {
                return None;
            };
            Some(ThresholdBreach {
                metric: metric.clone(),
                level,
                value,
                threshold: limit,
            })
        })
        .collect()
}

fn metric_value(sample: &MetricSample, metric: &str) -> Option<f64> {
    match metric {
        "cpuUsage" => Some(sample.cpu_usage),
        "memoryUsage" => Some(sample.memory_usage),
        "diskIO" => Some(sample.disk_io),
        "latency" => Some(sample.latency),
        "networkIO" => sample.network_io,
        _ => None,
    }
}

/// Rule-based flags for a live metrics reading (percentages).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnomalyFlag {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub severity: &'static str,
    pub message: String,
}

/// Checks cpu above 90, memory above 95 and network above 80 with cpu below
/// 30. Feeds built with [`crate::FeedConfig::with_anomaly_flags`] attach the
/// result to every push record through [`flag_anomalies`].
pub fn simple_anomalies(cpu: f64, memory: f64, network: f64) -> Vec<AnomalyFlag> {
    let mut flags = Vec::new();
    if cpu > 90.0 {
        flags.push(AnomalyFlag {
            kind: "cpu_spike",
            severity: "high",
            message: format!("CPU usage at {cpu}% - significantly above normal"),
        });
    }
    if memory > 95.0 {
        flags.push(AnomalyFlag {
            kind: "memory_critical",
            severity: "critical",
            message: format!("Memory usage at {memory}% - critical level reached"),
        });
    }
    if network > 80.0 && cpu < 30.0 {
        flags.push(AnomalyFlag {
            kind: "network_anomaly",
            severity: "medium",
            message: "High network usage with low CPU - possible DDoS or data transfer issue"
                .to_owned(),
        });
    }
    flags
}

/// Adds an `anomaly_detected` array to a metrics record.
///
/// Reads `cpu`/`cpuUsage`, `memory`/`memoryUsage` and `network`/`networkIO`;
/// missing values count as zero. Non-object payloads are left alone.
pub fn flag_anomalies(record: &mut Value) {
    let Some(fields) = record.as_object_mut() else {
        return;
    };
    let read = |short: &str, long: &str| {
        fields
            .get(short)
            .or_else(|| fields.get(long))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };
    let flags = simple_anomalies(
        read("cpu", "cpuUsage"),
        read("memory", "memoryUsage"),
        read("network", "networkIO"),
    );
    let flags = flags
        .into_iter()
        .map(|flag| json!({"type": flag.kind, "severity": flag.severity, "message": flag.message}))
        .collect();
    fields.insert("anomaly_detected".to_owned(), Value::Array(flags));
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TemperatureThresholds {
    pub critical: f64,
    pub warning: f64,
}

impl Default for TemperatureThresholds {
    fn default() -> Self {
        Self {
            critical: 8.0,
            warning: 7.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Normal,
    Warning,
    Alarm,
}

impl TemperatureThresholds {
    pub fn status(&self, temperature: f64) -> UnitStatus {
        if temperature >= self.critical {
            UnitStatus::Alarm
        } else if temperature >= self.warning {
            UnitStatus::Warning
        } else {
            UnitStatus::Normal
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TemperatureOverview {
    pub total: usize,
    pub critical: usize,
    pub warning: usize,
    pub healthy: usize,
    /// Rounded to one decimal.
    pub average: f64,
}

impl TemperatureOverview {
    /// Classifies each reading by its temperature, not by its reported status.
    pub fn from_readings(
        readings: &[TemperatureReading],
        thresholds: &TemperatureThresholds,
    ) -> Self {
        let mut overview = Self {
            total: readings.len(),
            ..Self::default()
        };
        for reading in readings {
            match thresholds.status(reading.temperature) {
                UnitStatus::Alarm => overview.critical += 1,
                UnitStatus::Warning => overview.warning += 1,
                UnitStatus::Normal => overview.healthy += 1,
            }
        }
        if !readings.is_empty() {
            let sum: f64 = readings.iter().map(|reading| reading.temperature).sum();
            overview.average = round1(sum / readings.len() as f64);
        }
        overview
    }
}

fn for_unit<'a>(
    readings: &'a [TemperatureReading],
    fridge_id: Option<&'a str>,
) -> impl Iterator<Item = &'a TemperatureReading> {
    readings
        .iter()
        .filter(move |reading| fridge_id.is_none() || reading.fridge_id.as_deref() == fridge_id)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TemperatureStatistics {
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub range: f64,
}

impl TemperatureStatistics {
    /// Statistics over one unit, or all units when `fridge_id` is `None`.
    /// Values are rounded to one decimal; `None` without readings.
    pub fn from_readings(readings: &[TemperatureReading], fridge_id: Option<&str>) -> Option<Self> {
        let temperatures: Vec<f64> = for_unit(readings, fridge_id)
            .map(|reading| reading.temperature)
            .collect();
        if temperatures.is_empty() {
            return None;
        }
        let min = temperatures.iter().copied().fold(f64::INFINITY, f64::min);
        let max = temperatures.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let average = temperatures.iter().sum::<f64>() / temperatures.len() as f64;
        Some(Self {
            min: round1(min),
            max: round1(max),
            average: round1(average),
            range: round1(max - min),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TemperatureTrend {
    pub trend: Trend,
    /// Last minus first reading, rounded to one decimal.
    pub change: f64,
}

/// Oldest-to-newest change of one unit; moves within ±0.5 °C are stable.
pub fn temperature_trend(history: &[TemperatureReading], fridge_id: &str) -> TemperatureTrend {
    let mut readings: Vec<_> = for_unit(history, Some(fridge_id)).collect();
    readings.sort_by_key(|reading| parse_timestamp(reading.timestamp.as_deref()));
    let (Some(first), Some(last)) = (readings.first(), readings.last()) else {
        return TemperatureTrend {
            trend: Trend::Stable,
            change: 0.0,
        };
    };
    let change = last.temperature - first.temperature;
    let trend = if change.abs() <= 0.5 {
        Trend::Stable
    } else if change > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    };
    TemperatureTrend {
        trend,
        change: round1(change),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureAlert {
    /// `temperature_critical` or `temperature_warning`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub fridge_id: Option<String>,
    pub temperature: f64,
    pub threshold: f64,
    pub location: Option<String>,
    pub timestamp: Option<String>,
}

/// Alerts for units in alarm or warning.
///
/// Uses the reported `status` and classifies by temperature when a reading
/// carries none.
pub fn temperature_alerts(
    readings: &[TemperatureReading],
    thresholds: &TemperatureThresholds,
) -> Vec<TemperatureAlert> {
    readings
        .iter()
        .filter_map(|reading| {
            let status = match reading.status.as_deref() {
                Some("alarm") => UnitStatus::Alarm,
                Some("warning") => UnitStatus::Warning,
                Some(_) => UnitStatus::Normal,
                None => thresholds.status(reading.temperature),
            };
            let (kind, threshold) = match status {
                UnitStatus::Alarm => ("temperature_critical", thresholds.critical),
                UnitStatus::Warning => ("temperature_warning", thresholds.warning),
                UnitStatus::Normal => return None,
            };
            Some(TemperatureAlert {
                kind,
                fridge_id: reading.fridge_id.clone(),
                temperature: reading.temperature,
                threshold,
                location: reading.location.clone(),
                timestamp: reading.timestamp.clone(),
            })
        })
        .collect()
}

/// Incident counts keyed by lower-cased priority.
pub fn incidents_by_priority(incidents: &[Incident]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for incident in incidents {
        let priority = incident
            .priority
            .as_deref()
            .unwrap_or("unknown")
            .to_lowercase();
        *counts.entry(priority).or_insert(0) += 1;
    }
    counts
}
