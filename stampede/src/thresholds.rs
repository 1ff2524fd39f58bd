use crate::aggregator::Snapshot;
use stampede_core::{Threshold, ThresholdResult};
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Judges every threshold against a snapshot, in declaration order.
pub fn evaluate(thresholds: &[Threshold], snapshot: &Snapshot, elapsed: Duration) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|threshold| judge(threshold, snapshot, elapsed))
        .collect()
}

/// First `abort_on_fail` threshold which fails once its delay has passed.
pub fn find_abort(
    thresholds: &[Threshold],
    snapshot: &Snapshot,
    elapsed: Duration,
) -> Option<ThresholdResult> {
    thresholds
        .iter()
        .filter(|t| t.abort_on_fail && elapsed >= t.delay_abort_eval)
        .map(|t| judge(t, snapshot, elapsed))
        .find(|result| !result.passed)
}

fn judge(threshold: &Threshold, snapshot: &Snapshot, elapsed: Duration) -> ThresholdResult {
    let observed = snapshot
        .get(&threshold.metric)
        .and_then(|agg| agg.value(threshold.expr.aggregation, elapsed));

    // NOTE: A metric without data cannot violate a threshold.
    let passed = observed.map_or(true, |v| threshold.expr.holds(v));
    if !passed {
        debug!(
            "Threshold {}: {} failed with {observed:?}",
            threshold.metric, threshold.expr
        );
    }

    ThresholdResult {
        metric: threshold.metric.to_string(),
        expression: threshold.expr.to_string(),
        observed,
        passed,
    }
}
