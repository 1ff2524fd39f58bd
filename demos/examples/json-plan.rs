use stampede::prelude::*;
use tracing::error;

/// Runs a plan file (default `plans/nextid.json`) against the mock service. Ctrl-C stops
/// the run early.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    demos::init_logging("stampede=debug");

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "plans/nextid.json".to_string());
    let json = tokio::fs::read_to_string(&path).await?;

    let plan = match RunPlan::from_json(&json) {
        Ok(plan) => plan,
        Err(err) => {
            error!("Invalid plan {path}: {err}");
            std::process::exit(RunError::from(err).exit_code());
        }
    };

    let test = LoadTest::new(plan, FnScenario::new("nextid", demos::fetch_id));
    let stop = test.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    match test.await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            std::process::exit(report.exit_code());
        }
        Err(err) => {
            error!("{err}");
            std::process::exit(err.exit_code());
        }
    }
}
