//! Helpers shared by the runnable demos.
use stampede::prelude::*;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const NEXTID_URL: &str = "http://localhost:8888/nextid";

/// Logs to stdout, honoring `RUST_LOG` when set.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    FmtSubscriber::builder().with_env_filter(filter).init();
}

/// Fetches an id from the mock service and counts it in `ids_fetched`.
pub async fn fetch_id(vu: VuContext) -> Result<(), IterationError> {
    let res = vu
        .request(Request::get(NEXTID_URL).timeout(Duration::from_secs(5)))
        .await?;
    vu.check(&res, "status is 200", |r| r.status == 200)?;
    let id: serde_json::Value = res.json()?;
    vu.check(&id, "has id", |v| v.get("id").is_some_and(|id| id.is_u64()))?;
    vu.counter("ids_fetched", 1.);
    Ok(())
}
