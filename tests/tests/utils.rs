use futures::future::BoxFuture;
use metrics_exporter_prometheus::PrometheusBuilder;
use rand_distr::{Distribution, Normal};
use stampede::http::{HttpExecutor, Request, RequestError, Response};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

pub const MOCK_ADDR: &str = "0.0.0.0:3002";

/// Installs logging, a Prometheus recorder and the mock service, once per test binary.
#[allow(unused)]
pub async fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    let wait = ONCE_LOCK.get().is_none();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_env_filter("stampede=debug,mock_service=debug,axum::rejection=trace")
            .init();

        PrometheusBuilder::new()
            .with_http_listener("0.0.0.0:8002".parse::<SocketAddr>().unwrap())
            .install()
            .unwrap();

        tokio::spawn(async {
            let addr: SocketAddr = MOCK_ADDR.parse().unwrap();
            mock_service::run(addr).await.unwrap();
        });
    });

    if wait {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// In-process executor answering every request with a fixed status after a fixed latency.
#[allow(unused)]
#[derive(Clone)]
pub struct MockExecutor {
    status: u16,
    latency: Duration,
    noise: Option<Normal<f64>>,
    body: &'static str,
    error: Option<RequestError>,
    hits: Arc<AtomicU64>,
}

#[allow(unused)]
impl MockExecutor {
    pub fn new(status: u16, latency: Duration) -> Self {
        Self {
            status,
            latency,
            noise: None,
            body: r#"{"error":false,"id":1}"#,
            error: None,
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Adds normally distributed noise (in milliseconds) to the latency.
    pub fn with_noise(mut self, std_ms: f64) -> Self {
        self.noise = Some(Normal::new(0., std_ms).unwrap());
        self
    }

    pub fn with_body(mut self, body: &'static str) -> Self {
        self.body = body;
        self
    }

    /// Fails every request with `error` after the latency.
    pub fn with_error(mut self, error: RequestError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

impl HttpExecutor for MockExecutor {
    fn execute(&self, _request: Request) -> BoxFuture<'_, Result<Response, RequestError>> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let latency = match &self.noise {
            Some(noise) => {
                let offset = noise.sample(&mut rand::thread_rng());
                Duration::from_secs_f64((self.latency.as_secs_f64() + offset / 1_000.).max(0.))
            }
            None => self.latency,
        };

        Box::pin(async move {
            tokio::time::sleep(latency).await;
            if let Some(err) = &self.error {
                return Err(err.clone());
            }
            Ok(Response::new(self.status)
                .with_body(self.body)
                .with_elapsed(latency))
        })
    }
}
