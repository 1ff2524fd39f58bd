//! Scenario definitions and the load test entry point.
use crate::error::RunError;
use crate::http::HttpExecutor;
use crate::scheduler;
use crate::vu::{IterationError, VuContext};
use futures_util::future::BoxFuture;
use stampede_core::{RunPlan, RunReport, DEFAULT_SCENARIO_NAME};
use std::borrow::Cow;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One iteration of user behavior, run in a loop by every virtual user.
///
/// Implementations hold no per-VU mutable state; everything an iteration needs comes
/// through its [`VuContext`]. Most scenarios are written with the
/// [`#[scenario]`](stampede_macros::scenario) macro, or a closure wrapped in [`FnScenario`].
pub trait Scenario: Send + Sync + 'static {
    /// Value of the `scenario` tag on every sample of the run.
    fn name(&self) -> &str {
        DEFAULT_SCENARIO_NAME
    }

    fn run(&self, vu: VuContext) -> impl Future<Output = Result<(), IterationError>> + Send;
}

/// Adapts a closure or `async fn` into a [`Scenario`].
pub struct FnScenario<F> {
    name: Cow<'static, str>,
    func: F,
}

impl<F, Fut> FnScenario<F>
where
    F: Fn(VuContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), IterationError>> + Send,
{
    pub fn new(name: impl Into<Cow<'static, str>>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F, Fut> Scenario for FnScenario<F>
where
    F: Fn(VuContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), IterationError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, vu: VuContext) -> impl Future<Output = Result<(), IterationError>> + Send {
        (self.func)(vu)
    }
}

/// Requests a hard stop of a running load test. All VUs are aborted and the run reports
/// [`RunOutcome::Stopped`](stampede_core::RunOutcome::Stopped).
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// A scenario bound to a plan, ready to run.
///
/// # Example
/// ```no_run
/// use stampede::prelude::*;
/// use std::time::Duration;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let plan = RunPlan::builder()
///         .stage(Duration::from_secs(30), 50)
///         .stage(Duration::from_secs(60), 50)
///         .stage(Duration::from_secs(30), 0)
///         .threshold("http_req_duration", "p(95)<500")
///         .pacing(Pacing::fixed(Duration::from_millis(50)))
///         .build()
///         .unwrap();
///
///     let report = LoadTest::new(plan, nextid()).await.unwrap();
///
///     std::process::exit(report.exit_code());
/// }
///
/// #[scenario]
/// async fn nextid(vu: VuContext) -> Result<(), IterationError> {
///     let res = vu.get("http://localhost:8888/nextid").await?;
///     vu.check(&res, "status is 200", |r| r.status == 200)?;
///     Ok(())
/// }
/// ```
pub struct LoadTest<S> {
    plan: RunPlan,
    scenario: S,
    executor: Option<Arc<dyn HttpExecutor>>,
    stop: StopHandle,
}

impl<S: Scenario> LoadTest<S> {
    pub fn new(plan: RunPlan, scenario: S) -> Self {
        Self {
            plan,
            scenario,
            executor: None,
            stop: StopHandle::default(),
        }
    }

    /// Executor every request of the run goes through.
    ///
    /// Defaults to a `ReqwestExecutor` when the `reqwest` feature is enabled.
    pub fn executor(mut self, executor: impl HttpExecutor) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Handle to stop the run from outside, e.g. on Ctrl-C.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub async fn run(self) -> Result<RunReport, RunError> {
        let executor = match self.executor {
            Some(executor) => executor,
            None => default_executor()?,
        };
        scheduler::run(self.plan, Arc::new(self.scenario), executor, self.stop).await
    }
}

impl<S: Scenario> IntoFuture for LoadTest<S> {
    type Output = Result<RunReport, RunError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

#[cfg(feature = "reqwest")]
fn default_executor() -> Result<Arc<dyn HttpExecutor>, RunError> {
    Ok(Arc::new(crate::http::ReqwestExecutor::default()))
}

#[cfg(not(feature = "reqwest"))]
fn default_executor() -> Result<Arc<dyn HttpExecutor>, RunError> {
    Err(RunError::MissingExecutor)
}
