use super::{HttpExecutor, Method, Request, RequestError, Response};
use futures_util::future::BoxFuture;
use std::time::Duration;
use tokio::time::Instant;

/// [`HttpExecutor`] backed by a shared `reqwest::Client`.
///
/// # Example
/// ```no_run
/// use stampede::http::ReqwestExecutor;
///
/// let executor = ReqwestExecutor::new(reqwest::Client::new());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpExecutor for ReqwestExecutor {
    fn execute(&self, request: Request) -> BoxFuture<'_, Result<Response, RequestError>> {
        Box::pin(async move {
            let timeout = request.timeout;
            let mut builder = self
                .client
                .request(method(request.method), &request.url)
                .body(request.body);
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }

            let start = Instant::now();
            let res = builder
                .send()
                .await
                .map_err(|e| request_error(e, timeout))?;

            let status = res.status().as_u16();
            let headers = res
                .headers()
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect();
            let body = res
                .bytes()
                .await
                .map_err(|e| request_error(e, timeout))?
                .to_vec();

            Ok(Response {
                status,
                headers,
                body,
                elapsed: start.elapsed(),
            })
        })
    }
}

fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn request_error(err: reqwest::Error, timeout: Option<Duration>) -> RequestError {
    if err.is_timeout() {
        RequestError::Timeout(timeout.unwrap_or_default())
    } else {
        RequestError::Transport(err.to_string())
    }
}
