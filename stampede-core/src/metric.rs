use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub type Tags = BTreeMap<String, String>;

/// The four kinds of metrics, named after their k6 counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Cumulative sum of values.
    Counter,
    /// Last observed value, plus its extremes.
    Gauge,
    /// Fraction of non-zero values.
    Rate,
    /// Distribution of values (percentiles, mean, extremes).
    Trend,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        };
        f.write_str(name)
    }
}

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATION_FAILED: &str = "iteration_failed";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";
pub const DATA_RECEIVED: &str = "data_received";
pub const DATA_SENT: &str = "data_sent";

/// Metrics emitted by the engine itself.
pub const BUILTIN_METRICS: [(&str, MetricKind); 11] = [
    (HTTP_REQS, MetricKind::Counter),
    (HTTP_REQ_DURATION, MetricKind::Trend),
    (HTTP_REQ_FAILED, MetricKind::Rate),
    (CHECKS, MetricKind::Rate),
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (ITERATION_FAILED, MetricKind::Rate),
    (VUS, MetricKind::Gauge),
    (VUS_MAX, MetricKind::Gauge),
    (DATA_RECEIVED, MetricKind::Counter),
    (DATA_SENT, MetricKind::Counter),
];

pub fn builtin_metric_kind(name: &str) -> Option<MetricKind> {
    BUILTIN_METRICS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, kind)| *kind)
}

/// Tag keys attached by the engine.
pub mod tag {
    pub const SCENARIO: &str = "scenario";
    pub const METHOD: &str = "method";
    pub const NAME: &str = "name";
    pub const STATUS: &str = "status";
    pub const EXPECTED_RESPONSE: &str = "expected_response";
    pub const ERROR: &str = "error";
    pub const CHECK: &str = "check";
}

/// A single observation. Immutable once handed to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: String,
    pub kind: MetricKind,
    pub value: f64,
    /// Offset from the start of the run.
    pub timestamp: Duration,
    pub tags: Tags,
}

impl Sample {
    pub fn new(metric: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            metric: metric.into(),
            kind,
            value,
            timestamp: Duration::ZERO,
            tags: Tags::new(),
        }
    }

    pub fn at(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: &Tags) -> Self {
        self.tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// A metric name with an optional tag selector, e.g. `http_req_duration{status:200}`.
///
/// A key with tags selects the sub-metric made of the samples carrying all of those tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: String,
    pub tags: Tags,
}

impl MetricKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn is_submetric(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn matches(&self, sample: &Sample) -> bool {
        sample.metric == self.name
            && self
                .tags
                .iter()
                .all(|(k, v)| sample.tags.get(k).is_some_and(|s| s == v))
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.is_submetric() {
            let tags: Vec<_> = self.tags.iter().map(|(k, v)| format!("{k}:{v}")).collect();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for MetricKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidMetricKey {
            key: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        let (name, selector) = match trimmed.find('{') {
            Some(open) => {
                let inner = trimmed[open + 1..]
                    .strip_suffix('}')
                    .ok_or_else(|| invalid("unterminated tag selector"))?;
                (trimmed[..open].trim(), Some(inner))
            }
            None => (trimmed, None),
        };

        if name.is_empty() {
            return Err(invalid("empty metric name"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("metric names may only contain [A-Za-z0-9_]"));
        }

        let mut key = MetricKey::new(name);
        if let Some(inner) = selector {
            for pair in inner.split(',') {
                let (k, v) = pair
                    .split_once(':')
                    .ok_or_else(|| invalid("tags must be written as key:value"))?;
                let (k, v) = (k.trim(), v.trim());
                if k.is_empty() || v.is_empty() {
                    return Err(invalid("empty tag key or value"));
                }
                key.tags.insert(k.to_string(), v.to_string());
            }
        }

        Ok(key)
    }
}
