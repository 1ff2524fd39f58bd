//! Sample ingestion and per-metric aggregation.
//!
//! Virtual users push samples into a lock-free [`AtomicBucket`]; the scheduler folds the
//! bucket into the aggregates on every control tick, so the pending backlog never grows
//! beyond one tick's worth of samples. Trend metrics keep a DDSketch-backed [`Summary`]
//! instead of raw values, which bounds memory regardless of run length.
use metrics_util::{AtomicBucket, Summary};
use stampede_core::{
    builtin_metric_kind, Aggregation, MetricKey, MetricKind, MetricSummary, Sample,
    SUMMARY_PERCENTILES,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Running statistics of one metric or sub-metric.
#[derive(Clone)]
pub struct MetricAggregate {
    kind: MetricKind,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
    non_zero: u64,
    quantiles: Option<Summary>,
}

impl MetricAggregate {
    fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            count: 0,
            sum: 0.,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: 0.,
            non_zero: 0,
            quantiles: (kind == MetricKind::Trend).then(Summary::with_defaults),
        }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
        if value != 0. {
            self.non_zero += 1;
        }
        if let Some(quantiles) = &mut self.quantiles {
            quantiles.add(value);
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Number of samples observed.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Most recent value, in per-VU recording order.
    pub fn last(&self) -> Option<f64> {
        (self.count > 0).then_some(self.last)
    }

    /// Samples with a non-zero value (passed checks, failed requests, ...).
    pub fn passes(&self) -> u64 {
        self.non_zero
    }

    pub fn fails(&self) -> u64 {
        self.count - self.non_zero
    }

    /// Fraction of non-zero samples.
    pub fn rate(&self) -> Option<f64> {
        (self.count > 0).then(|| self.non_zero as f64 / self.count as f64)
    }

    /// Estimated quantile in `[0, 1]`, trends only.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        self.quantiles.as_ref()?.quantile(q)
    }

    /// Reduces the aggregate the way a threshold asks for. `elapsed` is the run time so far,
    /// used for per-second counter rates.
    pub fn value(&self, aggregation: Aggregation, elapsed: Duration) -> Option<f64> {
        match (self.kind, aggregation) {
            (_, Aggregation::Avg) => self.mean(),
            (_, Aggregation::Min) => self.min(),
            (_, Aggregation::Max) => self.max(),
            (_, Aggregation::Med) => self.quantile(0.5),
            (_, Aggregation::Percentile(p)) => self.quantile(p / 100.),
            (MetricKind::Counter, Aggregation::Count) => Some(self.sum),
            (_, Aggregation::Count) => Some(self.count as f64),
            (MetricKind::Counter, Aggregation::Rate) => per_second(self.sum, elapsed),
            (_, Aggregation::Rate) => self.rate(),
            (_, Aggregation::Value) => self.last(),
        }
    }

    pub fn summarize(&self, elapsed: Duration) -> MetricSummary {
        let mut values = BTreeMap::new();
        let mut put = |stat: String, value: Option<f64>| {
            if let Some(value) = value {
                values.insert(stat, value);
            }
        };

        match self.kind {
            MetricKind::Counter => {
                put("count".to_string(), Some(self.sum));
                put("rate".to_string(), per_second(self.sum, elapsed));
            }
            MetricKind::Gauge => {
                put("value".to_string(), self.last());
                put("min".to_string(), self.min());
                put("max".to_string(), self.max());
            }
            MetricKind::Rate => {
                put("rate".to_string(), self.rate());
                put("passes".to_string(), Some(self.passes() as f64));
                put("fails".to_string(), Some(self.fails() as f64));
            }
            MetricKind::Trend => {
                put("avg".to_string(), self.mean());
                put("min".to_string(), self.min());
                put("med".to_string(), self.quantile(0.5));
                put("max".to_string(), self.max());
                for p in SUMMARY_PERCENTILES {
                    let agg = Aggregation::Percentile(p);
                    put(agg.to_string(), self.value(agg, elapsed));
                }
            }
        }

        MetricSummary {
            kind: self.kind,
            values,
        }
    }
}

impl fmt::Debug for MetricAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricAggregate")
            .field("kind", &self.kind)
            .field("count", &self.count)
            .field("sum", &self.sum)
            .field("min", &self.min())
            .field("max", &self.max())
            .field("p50", &self.quantile(0.5))
            .field("p95", &self.quantile(0.95))
            .finish()
    }
}

fn per_second(total: f64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    (secs > 0.).then(|| total / secs)
}

/// Point-in-time copy of every aggregate.
#[derive(Debug, Clone)]
pub struct Snapshot {
    metrics: BTreeMap<MetricKey, MetricAggregate>,
    ingested: u64,
}

impl Snapshot {
    pub fn get(&self, key: &MetricKey) -> Option<&MetricAggregate> {
        self.metrics.get(key)
    }

    /// Aggregate of a whole metric (not a sub-metric).
    pub fn metric(&self, name: &str) -> Option<&MetricAggregate> {
        self.metrics.get(&MetricKey::new(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricKey, &MetricAggregate)> {
        self.metrics.iter()
    }

    /// Total number of samples folded so far.
    pub fn ingested(&self) -> u64 {
        self.ingested
    }

    pub fn summarize(&self, elapsed: Duration) -> BTreeMap<String, MetricSummary> {
        self.metrics
            .iter()
            .map(|(key, agg)| (key.to_string(), agg.summarize(elapsed)))
            .collect()
    }
}

#[derive(Default)]
struct State {
    metrics: BTreeMap<MetricKey, MetricAggregate>,
    ingested: u64,
    // Reused between drains to avoid reallocating.
    pending: Vec<(u64, Sample)>,
    // Metrics already reported for a kind mismatch.
    mismatched: BTreeSet<String>,
}

impl State {
    fn fold(&mut self, submetrics: &[MetricKey], kind: MetricKind, sample: Sample) {
        if kind != sample.kind && self.mismatched.insert(sample.metric.clone()) {
            warn!(
                "Metric {} is a {kind} but was recorded as a {}; aggregating as a {kind}",
                sample.metric, sample.kind
            );
        }

        for key in submetrics.iter().filter(|key| key.matches(&sample)) {
            self.metrics
                .entry(key.clone())
                .or_insert_with(|| MetricAggregate::new(kind))
                .observe(sample.value);
        }

        self.metrics
            .entry(MetricKey::new(sample.metric))
            .or_insert_with(|| MetricAggregate::new(kind))
            .observe(sample.value);
        self.ingested += 1;
    }
}

/// Thread-safe sample sink shared by all virtual users.
pub struct Aggregator {
    incoming: AtomicBucket<(u64, Sample)>,
    seq: AtomicU64,
    submetrics: Vec<MetricKey>,
    kinds: BTreeMap<String, MetricKind>,
    state: Mutex<State>,
}

impl Aggregator {
    /// `submetrics` are tagged keys which get an aggregate of their own.
    pub fn new(submetrics: Vec<MetricKey>) -> Self {
        Self {
            incoming: AtomicBucket::new(),
            seq: AtomicU64::new(0),
            submetrics,
            kinds: BTreeMap::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Declared kinds of custom metrics. Declared and built-in kinds take precedence over
    /// the kind a sample was recorded with; other metrics keep the kind of their first sample.
    pub fn with_kinds(mut self, kinds: BTreeMap<String, MetricKind>) -> Self {
        self.kinds = kinds;
        self
    }

    fn kind_of(&self, state: &State, sample: &Sample) -> MetricKind {
        builtin_metric_kind(&sample.metric)
            .or_else(|| self.kinds.get(&sample.metric).copied())
            .or_else(|| {
                state
                    .metrics
                    .get(&MetricKey::new(sample.metric.as_str()))
                    .map(MetricAggregate::kind)
            })
            .unwrap_or(sample.kind)
    }

    /// Lock-free; never waits on a flush or snapshot in progress.
    pub fn record(&self, sample: Sample) {
        #[cfg(feature = "metrics")]
        forward(&sample);

        // NOTE: The sequence number restores recording order on drain, since the bucket
        // hands its blocks back newest first.
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.incoming.push((seq, sample));
    }

    /// Folds pending samples into the aggregates.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.drain_into(&mut state);
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.drain_into(&mut state);
        Snapshot {
            metrics: state.metrics.clone(),
            ingested: state.ingested,
        }
    }

    fn drain_into(&self, state: &mut State) {
        let mut pending = std::mem::take(&mut state.pending);
        self.incoming
            .clear_with(|block| pending.extend_from_slice(block));
        if pending.is_empty() {
            state.pending = pending;
            return;
        }

        trace!("Folding {} samples", pending.len());
        pending.sort_unstable_by_key(|(seq, _)| *seq);
        for (_, sample) in pending.drain(..) {
            let kind = self.kind_of(state, &sample);
            state.fold(&self.submetrics, kind, sample);
        }
        state.pending = pending;
    }
}

#[cfg(feature = "metrics")]
fn forward(sample: &Sample) {
    let labels: Vec<metrics::Label> = sample
        .tags
        .iter()
        .map(|(k, v)| metrics::Label::new(k.clone(), v.clone()))
        .collect();
    let name = sample.metric.clone();

    match sample.kind {
        MetricKind::Counter => metrics::counter!(name, labels).increment(sample.value as u64),
        MetricKind::Gauge => metrics::gauge!(name, labels).set(sample.value),
        MetricKind::Rate => {
            let mut labels = labels;
            let passed = if sample.value != 0. { "true" } else { "false" };
            labels.push(metrics::Label::new("passed", passed));
            metrics::counter!(name, labels).increment(1)
        }
        MetricKind::Trend => metrics::histogram!(name, labels).record(sample.value),
    }
}
