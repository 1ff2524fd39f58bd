use crate::{Aggregation, MetricKind};
use thiserror::Error;

/// A malformed plan. Always reported before any virtual user is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("A plan needs at least one stage.")]
    NoStages,

    #[error("The stages of a plan must last longer than zero.")]
    ZeroLengthPlan,

    #[error("Invalid metric key `{key}`: {reason}")]
    InvalidMetricKey { key: String, reason: &'static str },

    #[error("Invalid threshold `{expression}`: {reason}")]
    InvalidThreshold {
        expression: String,
        reason: &'static str,
    },

    #[error("Threshold on unknown metric `{0}`.")]
    UnknownMetric(String),

    #[error("Metric `{metric}` is a {kind} and does not support `{aggregation}`.")]
    UnsupportedAggregation {
        metric: String,
        kind: MetricKind,
        aggregation: Aggregation,
    },

    #[error("Custom metric `{0}` shadows a built-in metric.")]
    BuiltinRedefined(String),

    #[error("Pacing minimum must not exceed its maximum.")]
    InvalidPacing,

    #[error("The stages of a plan add up to more than the longest representable duration.")]
    PlanTooLong,

    #[error("The control tick must be longer than zero.")]
    ZeroTick,

    #[error("maxRps must be greater than zero.")]
    ZeroRps,

    #[error("Unable to parse plan: {0}")]
    Parse(#[from] serde_json::Error),
}
