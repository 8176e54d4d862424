//! Mutable reply state shared by every callback of one request.
//!
//! Handlers normally *return* their payload and let the pipeline serialize it.
//! Calling [`Reply::send`] instead marks the reply as sent: the pipeline stops at
//! the next checkpoint, skips every remaining hook and writes that payload as is.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::decorator::{DecoratorValue, Decorations};
use crate::error::{FrameworkError, Result};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Final status, headers and bytes for the host layer.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    /// Bare 500 used when even error delivery failed.
    #[must_use]
    pub fn internal_error() -> Self {
        let body = Bytes::from_static(
            br#"{"statusCode":500,"error":"Internal Server Error","message":"Internal Server Error"}"#,
        );
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers,
            body,
        }
    }
}

#[derive(Debug)]
struct ReplyState {
    status: StatusCode,
    headers: HeaderMap,
    sent: bool,
    payload: Option<Value>,
    decorations: Decorations,
}

/// Handle to the reply being built.
#[derive(Debug, Clone)]
pub struct Reply {
    inner: Arc<Mutex<ReplyState>>,
}

impl Reply {
    pub(crate) fn new(decorations: Decorations) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReplyState {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                sent: false,
                payload: None,
                decorations,
            })),
        }
    }

    /// Set the response status.
    pub fn code(&self, status: StatusCode) -> &Self {
        self.inner.lock().status = status;
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.lock().status
    }

    /// Set (replace) a response header.
    ///
    /// # Errors
    ///
    /// Fails when the name or value is not a valid HTTP header.
    pub fn header(&self, name: &str, value: &str) -> Result<&Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FrameworkError::Internal(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FrameworkError::Internal(format!("invalid header value: {e}")))?;
        self.inner.lock().headers.insert(name, value);
        Ok(self)
    }

    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.inner.lock().headers.contains_key(name)
    }

    pub fn remove_header(&self, name: &str) -> &Self {
        self.inner.lock().headers.remove(name);
        self
    }

    /// Send `payload` now and end processing of this request.
    ///
    /// A second call is ignored.
    pub fn send(&self, payload: impl Into<Value>) {
        let mut state = self.inner.lock();
        if state.sent {
            warn!("Reply was already sent");
            return;
        }
        state.sent = true;
        state.payload = Some(payload.into());
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.inner.lock().sent
    }

    #[must_use]
    pub fn has_decorator(&self, name: &str) -> bool {
        self.inner.lock().decorations.contains(name)
    }

    #[must_use]
    pub fn decoration(&self, name: &str) -> Option<DecoratorValue> {
        self.inner.lock().decorations.get(name).cloned()
    }

    #[must_use]
    pub fn decoration_json(&self, name: &str) -> Option<Value> {
        self.decoration(name).and_then(|v| v.as_json().cloned())
    }

    #[must_use]
    pub fn decoration_as<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.decoration(name).and_then(|v| v.downcast::<T>())
    }

    /// Overwrite a declared reply decoration for this reply only.
    ///
    /// # Errors
    ///
    /// Fails when `name` was never declared with `decorate_reply`.
    pub fn set_decoration(&self, name: &str, value: impl Into<DecoratorValue>) -> Result<()> {
        let mut state = self.inner.lock();
        if !state.decorations.contains(name) {
            return Err(FrameworkError::Internal(format!(
                "reply decorator '{name}' has not been declared"
            )));
        }
        state.decorations.set(name, value.into());
        Ok(())
    }

    /// Serialize a payload; strings go out as text, everything else as JSON.
    ///
    /// Sets the content type unless a callback already chose one.
    pub(crate) fn serialize(&self, payload: &Value) -> Result<Bytes> {
        let (body, content_type) = match payload {
            Value::String(s) => (Bytes::from(s.clone()), TEXT_CONTENT_TYPE),
            other => (Bytes::from(serde_json::to_vec(other)?), JSON_CONTENT_TYPE),
        };
        let mut state = self.inner.lock();
        if !state.headers.contains_key(CONTENT_TYPE) {
            state
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        Ok(body)
    }

    /// Response for bytes that went through the whole pipeline.
    pub(crate) fn to_response(&self, body: Bytes) -> RawResponse {
        let mut state = self.inner.lock();
        state.sent = true;
        let mut headers = state.headers.clone();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        RawResponse {
            status: state.status,
            headers,
            body,
        }
    }

    /// Response for a payload handed to [`Reply::send`].
    pub(crate) fn sent_response(&self) -> RawResponse {
        let payload = self.inner.lock().payload.take().unwrap_or(Value::Null);
        match self.serialize(&payload) {
            Ok(body) => self.to_response(body),
            Err(err) => {
                warn!(error = %err, "Failed to serialize sent payload");
                RawResponse::internal_error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_marks_sent_once() {
        let reply = Reply::new(Decorations::default());
        assert!(!reply.is_sent());
        reply.send(json!({"a": 1}));
        reply.send(json!({"a": 2}));
        assert!(reply.is_sent());
        let response = reply.sent_response();
        assert_eq!(&response.body[..], br#"{"a":1}"#);
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
    }

    #[test]
    fn test_string_payload_is_text() {
        let reply = Reply::new(Decorations::default());
        let body = reply.serialize(&json!("hello")).unwrap();
        let response = reply.to_response(body);
        assert_eq!(&response.body[..], b"hello");
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers.get(CONTENT_LENGTH).unwrap(), "5");
    }

    #[test]
    fn test_explicit_content_type_is_kept() {
        let reply = Reply::new(Decorations::default());
        reply.header("content-type", "application/x-custom").unwrap();
        reply.code(StatusCode::CREATED);
        let body = reply.serialize(&json!({"ok": true})).unwrap();
        let response = reply.to_response(body);
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "application/x-custom"
        );
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let reply = Reply::new(Decorations::default());
        assert!(reply.header("bad header", "x").is_err());
        assert!(reply.header("x-ok", "line\nbreak").is_err());
    }

    #[test]
    fn test_undeclared_decoration_cannot_be_set() {
        let reply = Reply::new(Decorations::default());
        assert!(reply.set_decoration("user", "alice").is_err());
    }
}
