//! The VU scheduler: follows the ramp, spawns and retires VUs, and decides when the run ends.
mod ramp;

use crate::aggregator::Aggregator;
use crate::clock::Timer;
use crate::error::RunError;
use crate::http::HttpExecutor;
use crate::scenario::{Scenario, StopHandle};
use crate::thresholds;
use crate::vu::{run_vu, VuShared};
use futures_util::future::join_all;
use governor::{Quota, RateLimiter};
use stampede_core::{MetricKind, RunOutcome, RunPlan, RunReport, Sample, VUS, VUS_MAX};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

struct VuHandle {
    id: u64,
    retire: CancellationToken,
    task: JoinHandle<()>,
}

struct Draining {
    vu: VuHandle,
    deadline: Instant,
}

/// Mutable state of one run, owned by the control loop.
struct RunContext<S> {
    plan: RunPlan,
    scenario: Arc<S>,
    shared: Arc<VuShared>,
    aggregator: Arc<Aggregator>,
    // Oldest first.
    active: VecDeque<VuHandle>,
    draining: Vec<Draining>,
    next_id: u64,
    max_vus: u64,
}

impl<S: Scenario> RunContext<S> {
    fn new(plan: RunPlan, scenario: Arc<S>, executor: Arc<dyn HttpExecutor>) -> Self {
        let aggregator =
            Arc::new(Aggregator::new(plan.submetrics()).with_kinds(plan.custom_metrics().clone()));
        let shared = Arc::new(VuShared {
            aggregator: aggregator.clone(),
            executor,
            started: Instant::now(),
            scenario: scenario.name().to_string(),
            pacing: plan.pacing(),
            request_timeout: plan.request_timeout(),
            limiter: plan
                .max_rps()
                .map(|rps| RateLimiter::direct(Quota::per_second(rps))),
        });

        Self {
            plan,
            scenario,
            shared,
            aggregator,
            active: VecDeque::new(),
            draining: vec![],
            next_id: 1,
            max_vus: 0,
        }
    }

    fn elapsed(&self) -> Duration {
        self.shared.started.elapsed()
    }

    fn live(&self) -> u64 {
        (self.active.len() + self.draining.len()) as u64
    }

    fn record_gauge(&self, metric: &str, value: u64) {
        self.aggregator.record(
            Sample::new(metric, MetricKind::Gauge, value as f64)
                .at(self.elapsed())
                .tag(stampede_core::tag::SCENARIO, self.shared.scenario.as_str()),
        );
    }

    /// Drops finished VUs and aborts draining ones past their deadline.
    fn reap(&mut self) {
        let before = self.active.len();
        self.active.retain(|vu| !vu.task.is_finished());
        if self.active.len() < before {
            warn!("{} VUs exited on their own", before - self.active.len());
        }

        let now = Instant::now();
        self.draining.retain(|d| {
            if d.vu.task.is_finished() {
                return false;
            }
            if now >= d.deadline {
                warn!("VU {} exceeded the graceful ramp-down window, aborting", d.vu.id);
                d.vu.task.abort();
                return false;
            }
            true
        });
    }

    fn scale(&mut self, desired: u64) -> Result<(), RunError> {
        if desired > self.plan.max_target() {
            return Err(RunError::SchedulerFault(format!(
                "desired concurrency {desired} exceeds the plan maximum {}",
                self.plan.max_target()
            )));
        }

        let active = self.active.len() as u64;
        if desired > active {
            trace!("Spawning {} VUs", desired - active);
            for _ in active..desired {
                self.spawn();
            }
        } else if desired < active {
            trace!("Retiring {} VUs", active - desired);
            let deadline = Instant::now() + self.plan.graceful_ramp_down();
            for _ in desired..active {
                if let Some(vu) = self.active.pop_front() {
                    vu.retire.cancel();
                    self.draining.push(Draining { vu, deadline });
                }
            }
        }

        if self.active.len() as u64 != desired {
            return Err(RunError::SchedulerFault(format!(
                "{} active VUs after scaling to {desired}",
                self.active.len()
            )));
        }

        self.max_vus = self.max_vus.max(self.live());
        Ok(())
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let retire = CancellationToken::new();
        let task = tokio::spawn(run_vu(
            self.scenario.clone(),
            self.shared.clone(),
            id,
            retire.clone(),
        ));
        self.active.push_back(VuHandle { id, retire, task });
    }

    /// Retires every VU and waits up to `window` for them to finish, then aborts the rest.
    ///
    /// Returns `true` if a stop request cut the wait short.
    async fn drain(&mut self, window: Duration, stop: &StopHandle) -> bool {
        let mut tasks: Vec<JoinHandle<()>> = vec![];
        for vu in self.active.drain(..) {
            vu.retire.cancel();
            tasks.push(vu.task);
        }
        tasks.extend(self.draining.drain(..).map(|d| d.vu.task));
        if tasks.is_empty() {
            return false;
        }

        info!("Waiting up to {} for {} VUs", humantime::format_duration(window), tasks.len());
        let aborts: Vec<AbortHandle> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let joined = join_all(tasks);
        tokio::pin!(joined);
        let stopped = tokio::select! {
            results = &mut joined => {
                log_panics(results);
                return false;
            }
            _ = tokio::time::sleep(window) => {
                warn!("VUs still running after the graceful stop window, aborting");
                false
            }
            _ = stop.stopped() => {
                warn!("Stop requested while draining, aborting VUs");
                true
            }
        };
        for handle in &aborts {
            handle.abort();
        }
        log_panics(joined.await);
        stopped
    }

    async fn abort(&mut self) {
        let mut tasks: Vec<_> = self.active.drain(..).map(|vu| vu.task).collect();
        tasks.extend(self.draining.drain(..).map(|d| d.vu.task));
        abort_all(tasks).await;
    }

    fn report(&self, outcome: RunOutcome) -> RunReport {
        let elapsed = self.elapsed();
        let snapshot = self.aggregator.snapshot();
        let thresholds = thresholds::evaluate(self.plan.thresholds(), &snapshot, elapsed);

        RunReport {
            scenario: self.shared.scenario.clone(),
            outcome,
            elapsed,
            max_vus: self.max_vus,
            metrics: snapshot.summarize(elapsed),
            thresholds,
        }
    }
}

async fn abort_all(tasks: Vec<JoinHandle<()>>) {
    for task in &tasks {
        task.abort();
    }
    log_panics(join_all(tasks).await);
}

fn log_panics(results: Vec<Result<(), JoinError>>) {
    for err in results.into_iter().filter_map(Result::err) {
        if err.is_panic() {
            error!("VU task panicked: {err}");
        }
    }
}

/// Drives one run from the first stage to the final report.
#[instrument(name = "run", skip_all, fields(scenario = scenario.name()))]
pub(crate) async fn run<S: Scenario>(
    plan: RunPlan,
    scenario: Arc<S>,
    executor: Arc<dyn HttpExecutor>,
    stop: StopHandle,
) -> Result<RunReport, RunError> {
    info!(
        "Running {} stages over {}",
        plan.stages().len(),
        humantime::format_duration(plan.duration())
    );

    let mut ctx = RunContext::new(plan, scenario, executor);
    ctx.record_gauge(VUS_MAX, ctx.plan.max_target());
    let has_abort_thresholds = ctx.plan.thresholds().iter().any(|t| t.abort_on_fail);
    let mut timer = Timer::new(ctx.plan.tick()).await;
    debug!("Control tick: {timer}");

    let outcome = loop {
        if stop.is_stopped() {
            break RunOutcome::Stopped;
        }

        let elapsed = ctx.elapsed();
        let Some(desired) = ramp::target_at(ctx.plan.stages(), ctx.plan.start_vus(), elapsed)
        else {
            break RunOutcome::Completed;
        };

        ctx.reap();
        if let Err(err) = ctx.scale(desired) {
            error!("{err}");
            ctx.abort().await;
            return Err(err);
        }
        ctx.record_gauge(VUS, ctx.live());

        let aborted = if has_abort_thresholds {
            let snapshot = ctx.aggregator.snapshot();
            thresholds::find_abort(ctx.plan.thresholds(), &snapshot, elapsed)
        } else {
            ctx.aggregator.flush();
            None
        };
        if let Some(failed) = aborted {
            warn!(
                "Threshold {}: {} failed, aborting the run",
                failed.metric, failed.expression
            );
            break RunOutcome::ThresholdAborted {
                metric: failed.metric,
                expression: failed.expression,
            };
        }

        tokio::select! {
            biased;
            _ = stop.stopped() => break RunOutcome::Stopped,
            since_last = timer.tick() => {
                let tick = ctx.plan.tick();
                if since_last > tick.saturating_add(tick / 2) {
                    debug!("Control tick late by {}", humantime::format_duration(since_last - tick));
                }
            }
        }
    };

    let outcome = match outcome {
        RunOutcome::Completed => {
            info!("All stages complete, draining VUs");
            let window = ctx.plan.graceful_stop();
            if ctx.drain(window, &stop).await {
                RunOutcome::Stopped
            } else {
                RunOutcome::Completed
            }
        }
        outcome => {
            ctx.abort().await;
            outcome
        }
    };

    let report = ctx.report(outcome);
    info!(
        "Run finished in {}: {} thresholds failed",
        humantime::format_duration(report.elapsed),
        report.failed_thresholds().count()
    );
    Ok(report)
}
