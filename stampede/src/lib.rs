#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Lets `#[scenario]` expansions resolve `::stampede` inside this crate's own tests.
extern crate self as stampede;

pub mod aggregator;
pub mod error;
pub mod http;
pub mod scenario;
pub mod thresholds;
pub mod vu;

pub(crate) mod clock;
pub(crate) mod scheduler;

pub use error::RunError;
pub use scenario::{FnScenario, LoadTest, Scenario, StopHandle};
pub use stampede_core as core;
pub use stampede_macros::scenario;
pub use vu::{IterationError, VuContext};

pub mod prelude {
    pub use crate::error::RunError;
    pub use crate::http::{HttpExecutor, Method, Request, RequestError, Response};
    pub use crate::scenario::{FnScenario, LoadTest, Scenario, StopHandle};
    pub use crate::vu::{IterationError, VuContext};
    pub use stampede_core::{MetricKind, Pacing, RunOutcome, RunPlan, RunReport, Stage};
    pub use stampede_macros::scenario;

    #[cfg(feature = "reqwest")]
    pub use crate::http::ReqwestExecutor;
}
