use axum::{debug_handler, extract::Path, http::StatusCode, routing::get, Json, Router};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lazy_static::lazy_static;
use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tower_http::trace::TraceLayer;
use tracing::debug;

pub fn router() -> Router {
    Router::new()
        .route("/nextid", get(next_id))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/status/:code", get(status))
        .route("/capped/:max_tps/nextid", get(capped))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router()).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct IdResponse {
    error: bool,
    id: Option<u64>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next() -> Json<IdResponse> {
    Json(IdResponse {
        error: false,
        id: Some(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
    })
}

#[debug_handler]
pub async fn next_id() -> Json<IdResponse> {
    counter!("mock-service.nextid").increment(1);
    next()
}

#[debug_handler]
pub async fn delay(Path(delay_ms): Path<u64>) -> Json<IdResponse> {
    counter!("mock-service.delay").increment(1);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    next()
}

#[debug_handler]
pub async fn status(Path(code): Path<u16>) -> Result<Json<IdResponse>, StatusCode> {
    let code = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    if code.is_success() {
        Ok(next())
    } else {
        Err(code)
    }
}

lazy_static! {
    static ref CAPPED: RwLock<HashMap<u32, Arc<DefaultDirectRateLimiter>>> =
        RwLock::new(HashMap::new());
}

/// Like `/nextid`, but answers 503 beyond `max_tps` requests per second.
#[debug_handler]
pub async fn capped(
    Path(max_tps): Path<u32>,
) -> Result<Json<IdResponse>, (StatusCode, Json<IdResponse>)> {
    let unavailable = || {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(IdResponse {
                error: true,
                id: None,
            }),
        )
    };
    let tps = NonZeroU32::new(max_tps).ok_or_else(unavailable)?;

    let existing = CAPPED
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&max_tps)
        .cloned();
    let limiter = match existing {
        Some(limiter) => limiter,
        None => CAPPED
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(max_tps)
            .or_insert_with(|| Arc::new(RateLimiter::direct(Quota::per_second(tps))))
            .clone(),
    };

    match limiter.check() {
        Ok(_) => Ok(next()),
        Err(_) => {
            debug!("Capped at {max_tps} TPS");
            counter!("mock-service.capped.rejected").increment(1);
            Err(unavailable())
        }
    }
}
