mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;
    use stampede::core::{CHECKS, HTTP_REQS, HTTP_REQ_DURATION};
    use stampede::prelude::*;
    use std::time::Duration;

    fn url(path: &str) -> String {
        format!("http://{}{path}", MOCK_ADDR.replace("0.0.0.0", "127.0.0.1"))
    }

    #[tokio::test]
    async fn nextid_ramp() {
        init().await;

        let plan = RunPlan::builder()
            .stage(Duration::from_secs(5), 20)
            .stage(Duration::from_secs(10), 20)
            .stage(Duration::from_secs(5), 0)
            .threshold(HTTP_REQ_DURATION, "p(95)<500")
            .threshold(CHECKS, "rate>0.99")
            .pacing(Pacing::fixed(Duration::from_millis(50)))
            .build()
            .unwrap();

        let report = LoadTest::new(plan, nextid()).await.unwrap();
        println!("{report}");

        assert!(report.passed());
        assert_eq!(report.max_vus, 20);
        assert!(report.value(HTTP_REQS, "count").unwrap() > 1_000.);
    }

    #[tokio::test]
    async fn capped_service_fails_checks() {
        init().await;

        let plan = RunPlan::builder()
            .start_vus(20)
            .stage(Duration::from_secs(10), 20)
            .threshold(CHECKS, "rate>0.99")
            .threshold("http_req_failed{status:503}", "rate==1")
            .build()
            .unwrap();

        let scenario = FnScenario::new("capped", |vu: VuContext| async move {
            let res = vu.get(&url("/capped/100/nextid")).await?;
            vu.check(&res, "status is 200", |r| r.status == 200)?;
            Ok::<_, IterationError>(())
        });

        let report = LoadTest::new(plan, scenario).await.unwrap();
        println!("{report}");

        assert!(!report.passed());
        let verdicts: Vec<_> = report.thresholds.iter().map(|t| t.passed).collect();
        assert_eq!(verdicts, [false, true]);
        // 100 requests per second get through.
        let rate = report.value(CHECKS, "rate").unwrap();
        assert!(rate < 0.5, "check rate {rate}");
    }

    #[tokio::test]
    async fn slow_endpoint_breaks_latency_threshold() {
        init().await;

        let plan = RunPlan::builder()
            .start_vus(5)
            .stage(Duration::from_secs(5), 5)
            .threshold(HTTP_REQ_DURATION, "p(95)<100ms")
            .threshold("http_req_duration{name:delay}", "med>=200")
            .build()
            .unwrap();

        let scenario = FnScenario::new("delay", |vu: VuContext| async move {
            vu.request(Request::get(url("/delay/ms/250")).name("delay"))
                .await?
                .error_for_status()?;
            Ok::<_, IterationError>(())
        });

        let report = LoadTest::new(plan, scenario).await.unwrap();
        println!("{report}");

        let verdicts: Vec<_> = report.thresholds.iter().map(|t| t.passed).collect();
        assert_eq!(verdicts, [false, true]);
    }

    #[scenario]
    async fn nextid(vu: VuContext) -> Result<(), IterationError> {
        let res = vu.get(&url("/nextid")).await?;
        vu.check(&res, "status is 200", |r| r.status == 200)?;
        vu.check(&res, "has id", |r| r.json_field("id").is_some())?;
        Ok(())
    }
}
