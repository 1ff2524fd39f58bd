//! Virtual users and the per-iteration context handed to scenarios.
use crate::aggregator::Aggregator;
use crate::clock::think_time;
use crate::http::{HttpExecutor, Request, RequestError, Response};
use crate::scenario::Scenario;
use futures_util::FutureExt;
use governor::DefaultDirectRateLimiter;
use stampede_core::{
    tag, MetricKind, Pacing, Sample, DATA_RECEIVED, DATA_SENT, HTTP_REQS, HTTP_REQ_DURATION,
    HTTP_REQ_FAILED, CHECKS, ITERATIONS, ITERATION_DURATION, ITERATION_FAILED,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Why an iteration ended early. Recorded as a failed iteration; never stops the run.
#[derive(Debug, Error)]
pub enum IterationError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Check `{0}` panicked.")]
    CheckPanicked(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl IterationError {
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }
}

/// State shared by every VU of a run.
pub(crate) struct VuShared {
    pub aggregator: Arc<Aggregator>,
    pub executor: Arc<dyn HttpExecutor>,
    pub started: Instant,
    pub scenario: String,
    pub pacing: Pacing,
    pub request_timeout: Duration,
    pub limiter: Option<DefaultDirectRateLimiter>,
}

impl VuShared {
    fn emit(&self, sample: Sample) {
        let sample = sample
            .at(self.started.elapsed())
            .tag(tag::SCENARIO, self.scenario.as_str());
        self.aggregator.record(sample);
    }
}

/// Handle a scenario uses to issue requests, run checks and record custom metrics.
///
/// Every sample recorded through the context is tagged with the scenario's name.
#[derive(Clone)]
pub struct VuContext {
    id: u64,
    iteration: u64,
    shared: Arc<VuShared>,
}

impl VuContext {
    /// Sequential id of the VU, starting at 1.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Index of the current iteration of this VU, starting at 0.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn scenario(&self) -> &str {
        &self.shared.scenario
    }

    /// Time since the start of the run.
    pub fn elapsed(&self) -> Duration {
        self.shared.started.elapsed()
    }

    /// Sends a request through the run's executor and records the `http_*` and `data_*`
    /// metrics for it.
    ///
    /// A non-2xx response is still returned as `Ok` so checks can inspect it, but counts as a
    /// failed request. Timeouts and transport failures are returned as [`RequestError`] and
    /// also recorded as a failed `checks` sample tagged with the error.
    pub async fn request(&self, request: Request) -> Result<Response, RequestError> {
        if let Some(limiter) = &self.shared.limiter {
            limiter.until_ready().await;
        }

        let timeout = request.timeout.unwrap_or(self.shared.request_timeout);
        let tags = [
            (tag::METHOD, request.method.as_str().to_string()),
            (tag::NAME, request.tag_name().to_string()),
        ];
        let sent = request.body.len();

        let start = Instant::now();
        let res = tokio::time::timeout(timeout, self.shared.executor.execute(request))
            .await
            .unwrap_or(Err(RequestError::Timeout(timeout)));

        let tagged = |metric: &str, kind: MetricKind, value: f64| {
            tags.iter()
                .fold(Sample::new(metric, kind, value), |s, (k, v)| s.tag(*k, v.as_str()))
        };
        self.shared.emit(tagged(DATA_SENT, MetricKind::Counter, sent as f64));

        match &res {
            Ok(response) => {
                let elapsed = if response.elapsed.is_zero() {
                    start.elapsed()
                } else {
                    response.elapsed
                };
                let status = response.status.to_string();
                let expected = response.is_success().to_string();
                let with_status = |s: Sample| {
                    s.tag(tag::STATUS, status.as_str())
                        .tag(tag::EXPECTED_RESPONSE, expected.as_str())
                };

                self.shared
                    .emit(with_status(tagged(HTTP_REQS, MetricKind::Counter, 1.)));
                self.shared.emit(with_status(tagged(
                    HTTP_REQ_DURATION,
                    MetricKind::Trend,
                    millis(elapsed),
                )));
                self.shared.emit(with_status(tagged(
                    HTTP_REQ_FAILED,
                    MetricKind::Rate,
                    flag(!response.is_success()),
                )));
                self.shared.emit(tagged(
                    DATA_RECEIVED,
                    MetricKind::Counter,
                    response.body.len() as f64,
                ));
            }
            Err(err) => {
                trace!("VU {} request failed: {err}", self.id);
                let with_error = |s: Sample| s.tag(tag::ERROR, err.tag());
                self.shared
                    .emit(with_error(tagged(HTTP_REQS, MetricKind::Counter, 1.)));
                self.shared
                    .emit(with_error(tagged(HTTP_REQ_FAILED, MetricKind::Rate, 1.)));
                // The iteration usually bails out through `?` before its own checks run.
                self.shared
                    .emit(with_error(tagged(CHECKS, MetricKind::Rate, 0.)));
            }
        }

        res
    }

    /// Shortcut for a `GET` request.
    pub async fn get(&self, url: &str) -> Result<Response, RequestError> {
        self.request(Request::get(url)).await
    }

    /// Evaluates a named check and records it in the `checks` metric.
    ///
    /// Returns the verdict; a failed check does not end the iteration. A panicking predicate
    /// is recorded as a failed check and ends the iteration with
    /// [`IterationError::CheckPanicked`].
    ///
    /// # Example
    /// ```ignore
    /// let res = vu.get("http://localhost:8888/nextid").await?;
    /// vu.check(&res, "status is 200", |r| r.status == 200)?;
    /// vu.check(&res, "has id", |r| r.json_field("id").is_some())?;
    /// ```
    pub fn check<T: ?Sized>(
        &self,
        subject: &T,
        name: &str,
        predicate: impl FnOnce(&T) -> bool,
    ) -> Result<bool, IterationError> {
        let verdict = std::panic::catch_unwind(AssertUnwindSafe(|| predicate(subject)));
        let passed = *verdict.as_ref().unwrap_or(&false);
        self.shared
            .emit(Sample::new(CHECKS, MetricKind::Rate, flag(passed)).tag(tag::CHECK, name));

        match verdict {
            Ok(passed) => Ok(passed),
            Err(panic) => {
                warn!("Check `{name}` panicked: {}", panic_message(&*panic));
                Err(IterationError::CheckPanicked(name.to_string()))
            }
        }
    }

    /// Adds to a counter metric.
    pub fn counter(&self, metric: &str, value: f64) {
        self.shared.emit(Sample::new(metric, MetricKind::Counter, value));
    }

    pub fn gauge(&self, metric: &str, value: f64) {
        self.shared.emit(Sample::new(metric, MetricKind::Gauge, value));
    }

    pub fn rate(&self, metric: &str, passed: bool) {
        self.shared
            .emit(Sample::new(metric, MetricKind::Rate, flag(passed)));
    }

    pub fn trend(&self, metric: &str, value: f64) {
        self.shared.emit(Sample::new(metric, MetricKind::Trend, value));
    }

    /// Records an arbitrary sample; the run's timestamp and scenario tag are filled in.
    pub fn record(&self, sample: Sample) {
        self.shared.emit(sample);
    }

    /// Suspends only this VU.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.
}

fn flag(b: bool) -> f64 {
    if b {
        1.
    } else {
        0.
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

/// Body of a VU task: loops the scenario until retired.
///
/// A panicking iteration retires the VU; the scheduler spawns a replacement if the ramp
/// still wants one.
pub(crate) async fn run_vu<S: Scenario>(
    scenario: Arc<S>,
    shared: Arc<VuShared>,
    id: u64,
    retire: CancellationToken,
) {
    trace!("VU {id} started");
    let mut iteration = 0;

    while !retire.is_cancelled() {
        let vu = VuContext {
            id,
            iteration,
            shared: shared.clone(),
        };

        let start = Instant::now();
        let res = AssertUnwindSafe(scenario.run(vu)).catch_unwind().await;
        let duration = start.elapsed();
        iteration += 1;

        let (failed, panicked) = match res {
            Ok(Ok(())) => (false, false),
            Ok(Err(err)) => {
                debug!("VU {id} iteration failed: {err}");
                (true, false)
            }
            Err(panic) => {
                error!("VU {id} panicked: {}", panic_message(&*panic));
                (true, true)
            }
        };

        shared.emit(Sample::new(ITERATIONS, MetricKind::Counter, 1.));
        shared.emit(Sample::new(
            ITERATION_DURATION,
            MetricKind::Trend,
            millis(duration),
        ));
        shared.emit(Sample::new(ITERATION_FAILED, MetricKind::Rate, flag(failed)));

        if panicked {
            break;
        }

        match think_time(shared.pacing) {
            Some(think) => {
                tokio::select! {
                    _ = retire.cancelled() => break,
                    _ = tokio::time::sleep(think) => {}
                }
            }
            // NOTE: An iteration which never awaits would otherwise hog the worker.
            None => tokio::task::yield_now().await,
        }
    }

    trace!("VU {id} retired after {iteration} iterations");
}
