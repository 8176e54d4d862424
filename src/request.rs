//! Per-request state handed to hooks, parsers and handlers.
//!
//! [`Request`] is a cheap-to-clone handle; every clone observes the same state.
//! The immutable parts (method, url, headers, raw body, raw captures) are fixed
//! when the request enters the pipeline. The parsed body, coerced params/query and
//! request decorations may change as the request moves through its hooks.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::context::ContextView;
use crate::decorator::{DecoratorValue, Decorations};
use crate::error::{FrameworkError, Result};
use crate::route::RouteRecord;
use crate::router::ParamVec;

/// Request identifier backed by a ULID.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct RequestId(pub ulid::Ulid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Reuse an upstream id when it is a valid ULID; otherwise mint a new one.
    #[must_use]
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .and_then(|s| s.trim().parse::<RequestId>().ok())
            .unwrap_or_default()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(RequestId)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<RequestId>()
            .map_err(|_| serde::de::Error::custom("invalid request id"))
    }
}

/// Set by the host layer when the connection goes away before a response.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the host layer hands to the pipeline.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    /// Path plus optional query string.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub abort: AbortSignal,
}

impl RawRequest {
    /// The url without its query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.split_once('?').map_or(self.url.as_str(), |(p, _)| p)
    }
}

struct RequestInner {
    id: RequestId,
    method: Method,
    url: String,
    path_len: usize,
    headers: HeaderMap,
    raw_query: ParamVec,
    raw_params: ParamVec,
    raw_body: Bytes,
    context: Arc<ContextView>,
    route: Option<Arc<RouteRecord>>,
    abort: AbortSignal,
    state: Mutex<RequestState>,
}

struct RequestState {
    params: Value,
    query: Value,
    body: Value,
    decorations: Decorations,
}

/// Handle to the request being processed.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("url", &self.inner.url)
            .finish_non_exhaustive()
    }
}

impl Request {
    pub(crate) fn new(
        id: RequestId,
        raw: RawRequest,
        params: ParamVec,
        context: Arc<ContextView>,
        route: Option<Arc<RouteRecord>>,
    ) -> Self {
        let path_len = raw.path().len();
        let raw_query = parse_query(raw.url.get(path_len + 1..).unwrap_or_default());
        let decorations = Decorations::new(Arc::clone(&context.decorators.request));
        let state = RequestState {
            params: pairs_to_object(&params),
            query: pairs_to_object(&raw_query),
            body: Value::Null,
            decorations,
        };
        Self {
            inner: Arc::new(RequestInner {
                id,
                method: raw.method,
                url: raw.url,
                path_len,
                headers: raw.headers,
                raw_query,
                raw_params: params,
                raw_body: raw.body,
                context,
                route,
                abort: raw.abort,
                state: Mutex::new(state),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Path plus query string, as received.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.url[..self.inner.path_len]
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE.as_str())
    }

    /// Raw (decoded, uncoerced) path parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner
            .raw_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn raw_params(&self) -> &ParamVec {
        &self.inner.raw_params
    }

    /// Path parameters as an object; coerced to schema types once validated.
    #[must_use]
    pub fn params(&self) -> Value {
        self.inner.state.lock().params.clone()
    }

    /// First raw value of a query-string key.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.inner
            .raw_query
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn raw_query(&self) -> &ParamVec {
        &self.inner.raw_query
    }

    /// Query string as an object; coerced to schema types once validated.
    #[must_use]
    pub fn query(&self) -> Value {
        self.inner.state.lock().query.clone()
    }

    /// Parsed body; `Null` until the body has been parsed or when there is none.
    #[must_use]
    pub fn body(&self) -> Value {
        self.inner.state.lock().body.clone()
    }

    pub fn set_body(&self, body: Value) {
        self.inner.state.lock().body = body;
    }

    #[must_use]
    pub fn raw_body(&self) -> &Bytes {
        &self.inner.raw_body
    }

    pub(crate) fn set_params(&self, params: Value) {
        self.inner.state.lock().params = params;
    }

    pub(crate) fn set_query(&self, query: Value) {
        self.inner.state.lock().query = query;
    }

    /// Pattern of the matched route; `None` inside a not-found handler.
    #[must_use]
    pub fn route_url(&self) -> Option<&str> {
        self.inner.route.as_deref().map(|r| r.url.as_str())
    }

    /// The matched route's `config` value.
    #[must_use]
    pub fn route_config(&self) -> Option<&Value> {
        self.inner.route.as_deref().map(|r| &r.config)
    }

    /// Name of the plugin context that owns this request.
    #[must_use]
    pub fn context_name(&self) -> &str {
        &self.inner.context.name
    }

    #[must_use]
    pub fn has_decorator(&self, name: &str) -> bool {
        self.inner.state.lock().decorations.contains(name)
    }

    /// Current value of a request decoration.
    #[must_use]
    pub fn decoration(&self, name: &str) -> Option<DecoratorValue> {
        self.inner.state.lock().decorations.get(name).cloned()
    }

    #[must_use]
    pub fn decoration_json(&self, name: &str) -> Option<Value> {
        self.decoration(name).and_then(|v| v.as_json().cloned())
    }

    #[must_use]
    pub fn decoration_as<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.decoration(name).and_then(|v| v.downcast::<T>())
    }

    /// Overwrite a declared request decoration for this request only.
    ///
    /// # Errors
    ///
    /// Fails when `name` was never declared with `decorate_request`.
    pub fn set_decoration(&self, name: &str, value: impl Into<DecoratorValue>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !state.decorations.contains(name) {
            return Err(FrameworkError::Internal(format!(
                "request decorator '{name}' has not been declared"
            )));
        }
        state.decorations.set(name, value.into());
        Ok(())
    }

    /// Instance decoration visible at the owning context.
    #[must_use]
    pub fn instance_decoration(&self, name: &str) -> Option<DecoratorValue> {
        self.inner.context.decorators.instance.get(name).cloned()
    }

    /// True once the client connection has gone away.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_aborted()
    }
}

fn parse_query(query: &str) -> ParamVec {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (Arc::from(decode_component(k).as_str()), decode_component(v))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), |c| c.into_owned())
}

/// Object view of string pairs; repeated keys become arrays.
fn pairs_to_object(pairs: &ParamVec) -> Value {
    let mut out = Map::new();
    for (k, v) in pairs {
        match out.get_mut(k.as_ref()) {
            Some(Value::Array(items)) => items.push(Value::String(v.clone())),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, Value::String(v.clone())]);
            }
            None => {
                out.insert(k.to_string(), Value::String(v.clone()));
            }
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_reuse() {
        let original = RequestId::new();
        let reused = RequestId::from_header_or_new(Some(&original.to_string()));
        assert_eq!(original, reused);
        let fresh = RequestId::from_header_or_new(Some("not-a-ulid"));
        assert_ne!(fresh, original);
    }

    #[test]
    fn test_request_id_serde() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_parse_query() {
        let q = parse_query("a=1&b=hello+world&c=%2Fx&flag&a=2");
        let pairs: Vec<(&str, &str)> = q.iter().map(|(k, v)| (k.as_ref(), v.as_str())).collect();
        assert_eq!(
            pairs,
            vec![
                ("a", "1"),
                ("b", "hello world"),
                ("c", "/x"),
                ("flag", ""),
                ("a", "2")
            ]
        );
        assert_eq!(
            pairs_to_object(&q),
            json!({"a": ["1", "2"], "b": "hello world", "c": "/x", "flag": ""})
        );
    }

    #[test]
    fn test_abort_signal_is_shared() {
        let signal = AbortSignal::default();
        let clone = signal.clone();
        assert!(!clone.is_aborted());
        signal.abort();
        assert!(clone.is_aborted());
    }

    #[test]
    fn test_raw_request_path() {
        let raw = RawRequest {
            method: Method::GET,
            url: "/a/b?x=1".into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            abort: AbortSignal::default(),
        };
        assert_eq!(raw.path(), "/a/b");
    }
}
