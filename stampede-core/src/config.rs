use crate::{
    builtin_metric_kind, ConfigError, MetricKey, MetricKind, Threshold, DEFAULT_GRACEFUL_RAMP_DOWN,
    DEFAULT_GRACEFUL_STOP, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TICK,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// One leg of the ramp: move linearly to `target` VUs over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Think time applied by each VU between two iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    #[default]
    None,
    Fixed(Duration),
    /// Uniformly distributed in `[min, max]`.
    Jittered { min: Duration, max: Duration },
}

impl Pacing {
    pub fn fixed(duration: Duration) -> Self {
        Pacing::Fixed(duration)
    }

    pub fn jittered(min: Duration, max: Duration) -> Self {
        Pacing::Jittered { min, max }
    }
}

/// The validated description of a run. Read-only once built.
#[derive(Debug, Clone)]
pub struct RunPlan {
    stages: Vec<Stage>,
    start_vus: u64,
    thresholds: Vec<Threshold>,
    metrics: BTreeMap<String, MetricKind>,
    pacing: Pacing,
    tick: Duration,
    graceful_ramp_down: Duration,
    graceful_stop: Duration,
    request_timeout: Duration,
    max_rps: Option<NonZeroU32>,
}

impl RunPlan {
    pub fn builder() -> RunPlanBuilder {
        RunPlanBuilder::default()
    }

    /// Parses a plan written in the shape of k6 options.
    ///
    /// # Example
    /// ```
    /// use stampede_core::RunPlan;
    ///
    /// let plan = RunPlan::from_json(r#"{
    ///     "stages": [
    ///         {"duration": "30s", "target": 50},
    ///         {"duration": "1m", "target": 50},
    ///         {"duration": "30s", "target": 0}
    ///     ],
    ///     "thresholds": {"http_req_duration": ["p(95)<500"]},
    ///     "pacing": "50ms"
    /// }"#).unwrap();
    ///
    /// assert_eq!(plan.duration().as_secs(), 120);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PlanConfig = serde_json::from_str(json)?;
        config.into_builder().build()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_vus(&self) -> u64 {
        self.start_vus
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn graceful_ramp_down(&self) -> Duration {
        self.graceful_ramp_down
    }

    pub fn graceful_stop(&self) -> Duration {
        self.graceful_stop
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn max_rps(&self) -> Option<NonZeroU32> {
        self.max_rps
    }

    /// Total length of all stages.
    pub fn duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration))
    }

    /// The highest concurrency the ramp can ask for.
    pub fn max_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, u64::max)
    }

    /// Kind of a built-in or declared custom metric.
    pub fn metric_kind(&self, name: &str) -> Option<MetricKind> {
        builtin_metric_kind(name).or_else(|| self.metrics.get(name).copied())
    }

    pub fn custom_metrics(&self) -> &BTreeMap<String, MetricKind> {
        &self.metrics
    }

    /// Tagged keys the aggregator has to track separately.
    pub fn submetrics(&self) -> Vec<MetricKey> {
        let mut keys: Vec<_> = self
            .thresholds
            .iter()
            .filter(|t| t.metric.is_submetric())
            .map(|t| t.metric.clone())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        let total = self
            .stages
            .iter()
            .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
            .ok_or(ConfigError::PlanTooLong)?;
        if total.is_zero() {
            return Err(ConfigError::ZeroLengthPlan);
        }
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        if let Pacing::Jittered { min, max } = self.pacing {
            if min > max {
                return Err(ConfigError::InvalidPacing);
            }
        }
        if let Some(name) = self
            .metrics
            .keys()
            .find(|name| builtin_metric_kind(name).is_some())
        {
            return Err(ConfigError::BuiltinRedefined(name.clone()));
        }

        for threshold in &self.thresholds {
            let kind = self
                .metric_kind(&threshold.metric.name)
                .ok_or_else(|| ConfigError::UnknownMetric(threshold.metric.name.clone()))?;
            threshold.check_kind(kind)?;
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct RunPlanBuilder {
    stages: Vec<Stage>,
    start_vus: u64,
    thresholds: Vec<Result<Threshold, ConfigError>>,
    metrics: BTreeMap<String, MetricKind>,
    pacing: Pacing,
    tick: Duration,
    graceful_ramp_down: Duration,
    graceful_stop: Duration,
    request_timeout: Duration,
    max_rps: Option<u32>,
}

impl Default for RunPlanBuilder {
    fn default() -> Self {
        Self {
            stages: vec![],
            start_vus: 0,
            thresholds: vec![],
            metrics: BTreeMap::new(),
            pacing: Pacing::None,
            tick: DEFAULT_TICK,
            graceful_ramp_down: DEFAULT_GRACEFUL_RAMP_DOWN,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_rps: None,
        }
    }
}

impl RunPlanBuilder {
    pub fn stage(mut self, duration: Duration, target: u64) -> Self {
        self.stages.push(Stage::new(duration, target));
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// VUs running at the very start of the run, before the first stage ramps.
    pub fn start_vus(mut self, start_vus: u64) -> Self {
        self.start_vus = start_vus;
        self
    }

    /// Adds a threshold, e.g. `.threshold("http_req_duration", "p(95)<500")`.
    pub fn threshold(mut self, metric: &str, expression: &str) -> Self {
        self.thresholds.push(Threshold::new(metric, expression));
        self
    }

    /// Adds a threshold which stops the run as soon as it fails, once `delay` has elapsed.
    pub fn threshold_abort_on_fail(mut self, metric: &str, expression: &str, delay: Duration) -> Self {
        self.thresholds
            .push(Threshold::new(metric, expression).map(|t| t.abort_on_fail(delay)));
        self
    }

    /// Declares a custom metric so thresholds may reference it.
    pub fn metric(mut self, name: &str, kind: MetricKind) -> Self {
        self.metrics.insert(name.to_string(), kind);
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn graceful_ramp_down(mut self, window: Duration) -> Self {
        self.graceful_ramp_down = window;
        self
    }

    pub fn graceful_stop(mut self, window: Duration) -> Self {
        self.graceful_stop = window;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Caps the request rate across all VUs.
    pub fn max_rps(mut self, max_rps: u32) -> Self {
        self.max_rps = Some(max_rps);
        self
    }

    pub fn build(self) -> Result<RunPlan, ConfigError> {
        let thresholds = self.thresholds.into_iter().collect::<Result<Vec<_>, _>>()?;
        let max_rps = match self.max_rps {
            Some(rps) => Some(NonZeroU32::new(rps).ok_or(ConfigError::ZeroRps)?),
            None => None,
        };

        let plan = RunPlan {
            stages: self.stages,
            start_vus: self.start_vus,
            thresholds,
            metrics: self.metrics,
            pacing: self.pacing,
            tick: self.tick,
            graceful_ramp_down: self.graceful_ramp_down,
            graceful_stop: self.graceful_stop,
            request_timeout: self.request_timeout,
            max_rps,
        };
        if let Err(err) = plan.validate() {
            warn!("Rejected plan: {err}");
            return Err(err);
        }
        debug!(
            "Plan with {} stages over {}, peaking at {} VUs",
            plan.stages.len(),
            humantime::format_duration(plan.duration()),
            plan.max_target()
        );
        Ok(plan)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PlanConfig {
    stages: Vec<Stage>,
    #[serde(default)]
    thresholds: BTreeMap<String, Vec<ThresholdConfig>>,
    #[serde(default)]
    pacing: Option<PacingConfig>,
    #[serde(default)]
    start_vus: u64,
    #[serde(default, with = "humantime_serde")]
    tick: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    graceful_ramp_down: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    graceful_stop: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    request_timeout: Option<Duration>,
    #[serde(default)]
    max_rps: Option<u32>,
    #[serde(default)]
    metrics: BTreeMap<String, MetricKind>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThresholdConfig {
    Expression(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
        #[serde(default, with = "humantime_serde")]
        delay_abort_eval: Option<Duration>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PacingConfig {
    Fixed(#[serde(with = "humantime_serde")] Duration),
    Jittered {
        #[serde(with = "humantime_serde")]
        min: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl PlanConfig {
    fn into_builder(self) -> RunPlanBuilder {
        let mut builder = RunPlan::builder()
            .stages(self.stages)
            .start_vus(self.start_vus);

        for (metric, thresholds) in &self.thresholds {
            for threshold in thresholds {
                builder = match threshold {
                    ThresholdConfig::Expression(expr) => builder.threshold(metric, expr),
                    ThresholdConfig::Detailed {
                        threshold,
                        abort_on_fail: true,
                        delay_abort_eval,
                    } => builder.threshold_abort_on_fail(
                        metric,
                        threshold,
                        delay_abort_eval.unwrap_or_default(),
                    ),
                    ThresholdConfig::Detailed { threshold, .. } => {
                        builder.threshold(metric, threshold)
                    }
                };
            }
        }

        for (name, kind) in self.metrics {
            builder = builder.metric(&name, kind);
        }

        builder = match self.pacing {
            Some(PacingConfig::Fixed(d)) => builder.pacing(Pacing::Fixed(d)),
            Some(PacingConfig::Jittered { min, max }) => builder.pacing(Pacing::Jittered { min, max }),
            None => builder,
        };
        if let Some(tick) = self.tick {
            builder = builder.tick(tick);
        }
        if let Some(window) = self.graceful_ramp_down {
            builder = builder.graceful_ramp_down(window);
        }
        if let Some(window) = self.graceful_stop {
            builder = builder.graceful_stop(window);
        }
        if let Some(timeout) = self.request_timeout {
            builder = builder.request_timeout(timeout);
        }
        if let Some(rps) = self.max_rps {
            builder = builder.max_rps(rps);
        }
        builder
    }
}
