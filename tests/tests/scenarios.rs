mod utils;
use utils::*;

use stampede::core::{
    ConfigError, RunOutcome, CHECKS, EXIT_EXTERNAL_ABORT, EXIT_INVALID_CONFIG, EXIT_SUCCESS,
    EXIT_THRESHOLDS_FAILED, HTTP_REQS, HTTP_REQ_DURATION, ITERATIONS, ITERATION_FAILED, VUS,
};
use stampede::prelude::*;
use std::time::Duration;

const NEXTID: &str = "http://localhost:8888/nextid";

fn k6_plan() -> stampede::core::RunPlanBuilder {
    RunPlan::builder()
        .stage(Duration::from_secs(30), 50)
        .stage(Duration::from_secs(60), 50)
        .stage(Duration::from_secs(30), 0)
        .threshold(HTTP_REQ_DURATION, "p(95)<500")
        .pacing(Pacing::fixed(Duration::from_millis(50)))
}

#[scenario]
async fn nextid(vu: VuContext) -> Result<(), IterationError> {
    let res = vu.get(NEXTID).await?;
    vu.check(&res, "status is 200", |r| r.status == 200)?;
    vu.check(&res, "has id", |r| r.json_field("id").is_some())?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn healthy_service_passes() {
    let executor = MockExecutor::new(200, Duration::from_millis(10));
    let plan = k6_plan().build().unwrap();

    let report = LoadTest::new(plan, nextid())
        .executor(executor.clone())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.max_vus, 50);
    assert!(report.passed());
    assert_eq!(report.exit_code(), EXIT_SUCCESS);

    assert_eq!(report.value(CHECKS, "rate"), Some(1.));
    let p95 = report.value(HTTP_REQ_DURATION, "p(95)").unwrap();
    assert!((p95 - 10.).abs() <= 1., "p95 = {p95}");
    assert_eq!(report.value(HTTP_REQS, "count"), Some(executor.hits() as f64));
    assert_eq!(report.value(ITERATION_FAILED, "rate"), Some(0.));
    assert!(report.thresholds[0].observed.is_some_and(|v| v < 500.));
}

#[tokio::test(start_paused = true)]
async fn unavailable_service_fails_checks() {
    let executor = MockExecutor::new(503, Duration::from_millis(10)).with_body("unavailable");
    let plan = k6_plan().threshold(CHECKS, "rate>0.99").build().unwrap();

    let report = LoadTest::new(plan, nextid())
        .executor(executor)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.value(CHECKS, "rate"), Some(0.));
    assert_eq!(report.value("http_req_failed", "rate"), Some(1.));

    let verdicts: Vec<_> = report.thresholds.iter().map(|t| t.passed).collect();
    assert_eq!(verdicts, [true, false]);
    assert!(!report.passed());
    assert_eq!(report.exit_code(), EXIT_THRESHOLDS_FAILED);
    assert!(report.to_string().contains("✗ checks: rate>0.99"));
}

#[test]
fn unknown_metric_is_rejected() {
    let err = k6_plan()
        .threshold("bogus_metric", "p(95)<500")
        .build()
        .unwrap_err();
    assert!(matches!(&err, ConfigError::UnknownMetric(name) if name == "bogus_metric"));
    assert_eq!(RunError::from(err).exit_code(), EXIT_INVALID_CONFIG);

    let err = RunPlan::from_json(
        r#"{"stages": [{"duration": "10s", "target": 1}],
            "thresholds": {"bogus_metric": ["p(95)<500"]}}"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownMetric(_)));
}

#[tokio::test(start_paused = true)]
async fn zero_length_stage_steps_at_next_tick() {
    let plan = RunPlan::builder()
        .stage(Duration::from_secs(2), 0)
        .stage(Duration::ZERO, 10)
        .stage(Duration::from_secs(3), 10)
        .metric("first_seen", MetricKind::Gauge)
        .build()
        .unwrap();

    let scenario = FnScenario::new("step", |vu: VuContext| async move {
        if vu.iteration() == 0 {
            vu.gauge("first_seen", vu.elapsed().as_secs_f64());
        }
        vu.sleep(Duration::from_millis(100)).await;
        Ok::<_, IterationError>(())
    });

    let report = LoadTest::new(plan, scenario)
        .executor(MockExecutor::new(200, Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(report.max_vus, 10);
    assert_eq!(report.value("first_seen", "min"), Some(2.));
    assert_eq!(report.value(VUS, "max"), Some(10.));
}

#[tokio::test(start_paused = true)]
async fn failing_threshold_aborts_run() {
    let plan = RunPlan::from_json(
        r#"{
            "stages": [{"duration": "30s", "target": 10}, {"duration": "1m", "target": 10}],
            "thresholds": {
                "checks": [{"threshold": "rate>0.99", "abortOnFail": true, "delayAbortEval": "10s"}]
            },
            "pacing": "50ms"
        }"#,
    )
    .unwrap();

    let report = LoadTest::new(plan, nextid())
        .executor(MockExecutor::new(503, Duration::from_millis(10)))
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        RunOutcome::ThresholdAborted {
            metric: CHECKS.to_string(),
            expression: "rate>0.99".to_string(),
        }
    );
    assert!(report.elapsed >= Duration::from_secs(10));
    assert!(report.elapsed < Duration::from_secs(12));
    assert_eq!(report.exit_code(), EXIT_THRESHOLDS_FAILED);
}

#[tokio::test(start_paused = true)]
async fn stop_handle_aborts_run() {
    let plan = k6_plan().build().unwrap();
    let test = LoadTest::new(plan, nextid()).executor(MockExecutor::new(200, Duration::from_millis(10)));
    let stop = test.stop_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        stop.stop();
    });

    let report = test.await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert!(report.elapsed < Duration::from_secs(6));
    assert!(report.passed());
    assert_eq!(report.exit_code(), EXIT_EXTERNAL_ABORT);
}

#[scenario("slow")]
async fn slow(vu: VuContext) -> Result<(), IterationError> {
    vu.sleep(Duration::from_secs(60)).await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_during_graceful_stop_is_reported() {
    let plan = RunPlan::builder()
        .start_vus(1)
        .stage(Duration::from_secs(2), 1)
        .build()
        .unwrap();
    let test = LoadTest::new(plan, slow()).executor(MockExecutor::new(200, Duration::ZERO));
    let stop = test.stop_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        stop.stop();
    });

    let report = test.await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert!(report.elapsed >= Duration::from_secs(5));
    assert!(report.elapsed < Duration::from_secs(6));
    assert_eq!(report.exit_code(), EXIT_EXTERNAL_ABORT);
}

#[tokio::test(start_paused = true)]
async fn slow_vus_are_aborted_after_ramp_down_window() {
    let plan = RunPlan::builder()
        .start_vus(2)
        .stage(Duration::from_secs(3), 2)
        .stage(Duration::ZERO, 0)
        .stage(Duration::from_secs(10), 0)
        .graceful_ramp_down(Duration::from_secs(2))
        .build()
        .unwrap();

    let report = LoadTest::new(plan, slow())
        .executor(MockExecutor::new(200, Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.scenario, "slow");
    assert_eq!(report.max_vus, 2);
    assert!(report.elapsed < Duration::from_secs(14));
    assert_eq!(report.metric(ITERATIONS), None);
    assert_eq!(report.value(VUS, "value"), Some(0.));
}

#[tokio::test(start_paused = true)]
async fn slow_vus_are_aborted_after_graceful_stop() {
    let plan = RunPlan::builder()
        .stage(Duration::from_secs(3), 2)
        .graceful_stop(Duration::from_secs(5))
        .build()
        .unwrap();

    let report = LoadTest::new(plan, slow())
        .executor(MockExecutor::new(200, Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.elapsed >= Duration::from_secs(8));
    assert!(report.elapsed < Duration::from_secs(9));
    assert_eq!(report.metric(ITERATIONS), None);
}

#[tracing_test::traced_test]
#[tokio::test(start_paused = true)]
async fn panicking_vu_does_not_abort_run() {
    let plan = RunPlan::builder()
        .start_vus(3)
        .stage(Duration::from_secs(5), 3)
        .pacing(Pacing::fixed(Duration::from_millis(100)))
        .build()
        .unwrap();

    let scenario = FnScenario::new("flaky", |vu: VuContext| async move {
        if vu.id() == 1 {
            panic!("VU 1 always fails");
        }
        vu.get(NEXTID).await?;
        Ok::<_, IterationError>(())
    });

    let report = LoadTest::new(plan, scenario)
        .executor(MockExecutor::new(200, Duration::from_millis(10)))
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.value(ITERATION_FAILED, "passes"), Some(1.));
    assert!(report.value(ITERATIONS, "count").unwrap() > 100.);
    assert!(logs_contain("VU 1 panicked: VU 1 always fails"));
}

#[tokio::test(start_paused = true)]
async fn timeouts_are_failed_requests() {
    let plan = RunPlan::builder()
        .start_vus(2)
        .stage(Duration::from_secs(10), 2)
        .request_timeout(Duration::from_millis(500))
        .threshold("http_req_failed{error:timeout}", "rate<0.5")
        .threshold(HTTP_REQ_DURATION, "p(95)<500")
        .build()
        .unwrap();

    let report = LoadTest::new(plan, nextid())
        .executor(MockExecutor::new(200, Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(report.value("http_req_failed", "rate"), Some(1.));
    assert_eq!(report.value("http_req_failed{error:timeout}", "rate"), Some(1.));
    assert_eq!(report.value(ITERATION_FAILED, "rate"), Some(1.));
    assert_eq!(report.value(CHECKS, "rate"), Some(0.));
    assert_eq!(report.metric(HTTP_REQ_DURATION), None);

    // No duration samples: the latency threshold has nothing to judge.
    let verdicts: Vec<_> = report.thresholds.iter().map(|t| (t.passed, t.observed.is_some())).collect();
    assert_eq!(verdicts, [(false, true), (true, false)]);
}

#[tokio::test(start_paused = true)]
async fn unreachable_service_fails_checks() {
    for executor in [
        MockExecutor::new(200, Duration::from_secs(2)),
        MockExecutor::new(200, Duration::from_millis(5))
            .with_error(RequestError::Transport("connection refused".to_string())),
    ] {
        let plan = RunPlan::builder()
            .start_vus(5)
            .stage(Duration::from_secs(10), 5)
            .request_timeout(Duration::from_millis(100))
            .threshold(CHECKS, "rate>0.99")
            .build()
            .unwrap();

        let report = LoadTest::new(plan, nextid()).executor(executor).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.value(CHECKS, "rate"), Some(0.));
        assert!(!report.thresholds[0].passed);
        assert_eq!(report.thresholds[0].observed, Some(0.));
        assert_eq!(report.exit_code(), EXIT_THRESHOLDS_FAILED);
    }
}

#[tokio::test(start_paused = true)]
async fn custom_metrics_and_jittered_pacing() {
    let plan = RunPlan::from_json(
        r#"{
            "stages": [{"duration": "10s", "target": 5}, {"duration": "10s", "target": 5}],
            "thresholds": {
                "id_lookup": ["avg<20", "p(99)<50"],
                "iterations": ["count>100"]
            },
            "metrics": {"id_lookup": "trend"},
            "pacing": {"min": "40ms", "max": "60ms"}
        }"#,
    )
    .unwrap();

    let scenario = FnScenario::new("custom", |vu: VuContext| async move {
        let res = vu.get(NEXTID).await?;
        vu.trend("id_lookup", res.elapsed.as_secs_f64() * 1_000.);
        let id: serde_json::Value = res.json()?;
        vu.check(&id, "id is a number", |v| v["id"].is_u64())?;
        Ok::<_, IterationError>(())
    });

    let report = LoadTest::new(plan, scenario)
        .executor(MockExecutor::new(200, Duration::from_millis(10)).with_noise(2.))
        .await
        .unwrap();

    assert!(report.passed(), "{report}");
    assert_eq!(report.scenario, "custom");
    assert_eq!(report.value(CHECKS, "rate"), Some(1.));
    let avg = report.value("id_lookup", "avg").unwrap();
    assert!((8. ..12.).contains(&avg), "avg = {avg}");
}

#[tokio::test]
#[ntest::timeout(10_000)]
async fn request_rate_is_capped() {
    let plan = RunPlan::builder()
        .start_vus(5)
        .stage(Duration::from_secs(2), 5)
        .max_rps(10)
        .tick(Duration::from_millis(250))
        .build()
        .unwrap();

    let executor = MockExecutor::new(200, Duration::from_millis(1));
    let report = LoadTest::new(plan, nextid())
        .executor(executor.clone())
        .await
        .unwrap();

    // A burst of ten, two seconds at the cap, and one last request per draining VU.
    let hits = executor.hits();
    assert!((10..=36).contains(&hits), "{hits} requests");
    assert_eq!(report.value(HTTP_REQS, "count"), Some(hits as f64));
}
