use crate::{
    MetricKind, EXIT_EXTERNAL_ABORT, EXIT_SUCCESS, EXIT_THRESHOLDS_FAILED,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Verdict of a single threshold expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    /// `None` when the metric had no data to judge.
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage ran to its end.
    Completed,
    /// Stopped through a `StopHandle`.
    Stopped,
    /// An `abort_on_fail` threshold failed mid-run.
    ThresholdAborted { metric: String, expression: String },
}

/// Reduced view of one metric, e.g. `avg`, `p(95)` for trends or `rate` for rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub kind: MetricKind,
    pub values: BTreeMap<String, f64>,
}

/// Statistics and verdict of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub outcome: RunOutcome,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub max_vus: u64,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub thresholds: Vec<ThresholdResult>,
}

impl RunReport {
    /// True when no threshold failed.
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    /// Process exit status, following k6's codes.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::ThresholdAborted { .. } => EXIT_THRESHOLDS_FAILED,
            _ if !self.passed() => EXIT_THRESHOLDS_FAILED,
            RunOutcome::Stopped => EXIT_EXTERNAL_ABORT,
            RunOutcome::Completed => EXIT_SUCCESS,
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    /// Shortcut for a single summary value, e.g. `report.value("http_req_duration", "p(95)")`.
    pub fn value(&self, metric: &str, stat: &str) -> Option<f64> {
        self.metrics.get(metric)?.values.get(stat).copied()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scenario: {}, elapsed: {}, max vus: {}",
            self.scenario,
            humantime::format_duration(self.elapsed),
            self.max_vus
        )?;
        match &self.outcome {
            RunOutcome::Completed => {}
            RunOutcome::Stopped => writeln!(f, "run stopped before completion")?,
            RunOutcome::ThresholdAborted { metric, expression } => {
                writeln!(f, "run aborted by threshold {metric}: {expression}")?
            }
        }

        for t in &self.thresholds {
            let mark = if t.passed { '✓' } else { '✗' };
            match t.observed {
                Some(observed) => writeln!(
                    f,
                    "  {mark} {}: {} (observed {observed:.3})",
                    t.metric, t.expression
                )?,
                None => writeln!(f, "  {mark} {}: {} (no data)", t.metric, t.expression)?,
            }
        }

        let width = self.metrics.keys().map(String::len).max().unwrap_or(0);
        for (name, summary) in &self.metrics {
            let values: Vec<_> = summary
                .values
                .iter()
                .map(|(stat, v)| format!("{stat}={v:.2}"))
                .collect();
            writeln!(f, "  {name:.<width$}..: {}", values.join(" "))?;
        }
        Ok(())
    }
}
