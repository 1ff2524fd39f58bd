//! The HTTP collaborator seam.
//!
//! The engine never implements a transport; it drives an [`HttpExecutor`] which performs a
//! single [`Request`] and hands back a [`Response`]. Enable the `reqwest` feature for an
//! executor backed by `reqwest`.
#[cfg(feature = "reqwest")]
mod reqwest_executor;

#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub use reqwest_executor::ReqwestExecutor;

use futures_util::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Falls back to the plan's request timeout when unset.
    pub timeout: Option<Duration>,
    /// Value of the `name` tag on the request's samples. Defaults to the URL.
    pub name: Option<String>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: vec![],
            body: vec![],
            timeout: None,
            name: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("content-type", "application/json").body(body))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Groups requests to dynamic URLs under one `name` tag.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn tag_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Time from sending the request to receiving the full body.
    pub elapsed: Duration,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: vec![],
            body: vec![],
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Looks up a top-level JSON field, `None` if the body is not a JSON object or lacks it.
    pub fn json_field(&self, field: &str) -> Option<serde_json::Value> {
        let mut value: serde_json::Value = self.json().ok()?;
        value.get_mut(field).map(serde_json::Value::take)
    }

    /// Turns a non-2xx response into [`RequestError::Status`].
    pub fn error_for_status(self) -> Result<Self, RequestError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RequestError::Status(self.status))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("Request timed out after {}.", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unexpected status code {0}.")]
    Status(u16),
}

impl RequestError {
    /// Value of the `error` tag on samples of the failed request.
    pub(crate) fn tag(&self) -> &'static str {
        match self {
            RequestError::Timeout(_) => "timeout",
            RequestError::Transport(_) => "transport",
            RequestError::Status(_) => "status",
        }
    }
}

/// Performs one HTTP request.
///
/// Implementations report every failure through [`RequestError`]; they must not panic on
/// transport errors. The engine applies the request timeout on top of whatever the
/// executor does itself.
pub trait HttpExecutor: Send + Sync + 'static {
    fn execute(&self, request: Request) -> BoxFuture<'_, Result<Response, RequestError>>;
}
