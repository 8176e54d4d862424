//! In-process request injection.
//!
//! [`Instance::inject`](crate::Instance::inject) runs an [`InjectRequest`] through
//! the same pipeline a socket request takes, minus the socket. Tests use it to
//! exercise routing, hooks and error handling without binding a port.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde_json::Value;

use crate::error::{FrameworkError, Result};
use crate::reply::RawResponse;
use crate::request::{AbortSignal, RawRequest};

/// A simulated request.
#[derive(Debug, Clone)]
pub struct InjectRequest {
    pub method: Method,
    /// Path plus optional query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub abort: AbortSignal,
}

impl InjectRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            abort: AbortSignal::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn options(url: impl Into<String>) -> Self {
        Self::new(Method::OPTIONS, url)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// JSON body; sets `content-type: application/json` unless already set.
    #[must_use]
    pub fn json(mut self, body: &Value) -> Self {
        self.body = Bytes::from(body.to_string());
        self.default_content_type("application/json")
    }

    /// Text body; sets `content-type: text/plain` unless already set.
    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self.default_content_type("text/plain")
    }

    /// Raw body; the content type is left to the caller.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Abort signal observed by the pipeline; firing it simulates a client hang-up.
    #[must_use]
    pub fn abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = signal;
        self
    }

    fn default_content_type(self, media_type: &str) -> Self {
        let present = self
            .headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
        if present {
            self
        } else {
            self.header(CONTENT_TYPE.as_str(), media_type)
        }
    }

    pub(crate) fn into_raw(self) -> Result<RawRequest> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FrameworkError::BadRequest(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FrameworkError::BadRequest(format!("invalid header value for '{name}': {e}")))?;
            headers.append(name, value);
        }
        let url = if self.url.starts_with('/') {
            self.url
        } else {
            format!("/{}", self.url)
        };
        Ok(RawRequest {
            method: self.method,
            url,
            headers,
            body: self.body,
            abort: self.abort,
        })
    }
}

/// What the pipeline produced for an injected request.
#[derive(Debug, Clone)]
pub struct InjectResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InjectResponse {
    /// Body as UTF-8, lossily.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl From<RawResponse> for InjectResponse {
    fn from(raw: RawResponse) -> Self {
        Self {
            status: raw.status,
            headers: raw.headers,
            body: raw.body,
        }
    }
}
