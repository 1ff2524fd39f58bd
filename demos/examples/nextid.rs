use stampede::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    demos::init_logging("stampede=info");

    let plan = RunPlan::builder()
        .stage(Duration::from_secs(30), 50)
        .stage(Duration::from_secs(60), 50)
        .stage(Duration::from_secs(30), 0)
        .threshold("http_req_duration", "p(95)<500")
        .pacing(Pacing::fixed(Duration::from_millis(50)))
        .build()?;

    let report = LoadTest::new(plan, nextid()).await?;
    println!("{report}");
    std::process::exit(report.exit_code());
}

#[scenario]
async fn nextid(vu: VuContext) -> Result<(), IterationError> {
    let res = vu.get("http://localhost:8888/nextid").await?;
    vu.check(&res, "status is 200", |r| r.status == 200)?;
    vu.check(&res, "has id", |r| r.json_field("id").is_some())?;
    Ok(())
}
