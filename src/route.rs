//! Route declarations and the records the router stores.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::Method;
use serde_json::Value;
use tracing::warn;

use crate::content_type::{self, ContentTypeParser, ParserTable};
use crate::context::ContextView;
use crate::error::Result;
use crate::hooks::{Hook, HookLists};
use crate::reply::Reply;
use crate::request::Request;
use crate::schema::{CompiledSchemas, RouteSchema};

/// Produces the route's payload; the pipeline serializes it.
pub type Handler = Arc<dyn Fn(Request, Reply) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |req: Request, reply: Reply| f(req, reply).boxed())
}

/// A route as declared by user code, before registration.
///
/// `onRoute` hooks receive it mutably and may rewrite any field except `prefix`,
/// which reflects the declaring context.
#[derive(Clone)]
pub struct RouteOptions {
    pub methods: Vec<Method>,
    pub url: String,
    pub handler: Handler,
    pub schema: RouteSchema,
    /// Route-level hooks; they run after the context's hooks for the same point.
    pub hooks: HookLists,
    /// Route-level body parsers keyed by normalized media type; they take
    /// precedence over the context's parsers for this route only.
    pub parsers: BTreeMap<String, ContentTypeParser>,
    /// Free-form data exposed as [`Request::route_config`].
    pub config: Value,
    pub prefix: String,
}

impl fmt::Debug for RouteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteOptions")
            .field("methods", &self.methods)
            .field("url", &self.url)
            .field("prefix", &self.prefix)
            .field("schema", &self.schema)
            .field("hooks", &self.hooks)
            .field("parsers", &self.parsers.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RouteOptions {
    pub fn new<F, Fut>(method: Method, url: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::with_handler(method, url, handler(f))
    }

    pub fn with_handler(method: Method, url: impl Into<String>, handler: Handler) -> Self {
        Self {
            methods: vec![method],
            url: url.into(),
            handler,
            schema: RouteSchema::default(),
            hooks: HookLists::default(),
            parsers: BTreeMap::new(),
            config: Value::Null,
            prefix: String::new(),
        }
    }

    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: RouteSchema) -> Self {
        self.schema = schema;
        self
    }

    #[must_use]
    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Parse bodies of `media_type` (or `*`) with `f` for this route only.
    #[must_use]
    pub fn content_type_parser<F, Fut>(mut self, media_type: &str, f: F) -> Self
    where
        F: Fn(Request, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.parsers.insert(
            content_type::normalize_media_type(media_type),
            content_type::parser(f),
        );
        self
    }

    /// Attach a route-level hook. `onRoute` and `onClose` only exist on contexts
    /// and are dropped here.
    #[must_use]
    pub fn hook(mut self, hook: Hook) -> Self {
        match hook {
            Hook::OnRoute(_) | Hook::OnClose(_) => {
                warn!(hook_point = %hook.point(), url = %self.url, "Ignoring context-only hook on route");
            }
            other => self.hooks.add(other),
        }
        self
    }
}

/// A registered route: one per (method, full path).
pub struct RouteRecord {
    pub method: Method,
    /// Full pattern, including the context prefix.
    pub url: String,
    pub handler: Handler,
    pub schemas: CompiledSchemas,
    /// Context hooks followed by route hooks.
    pub hooks: HookLists,
    /// Context parsers with the route's own laid over them.
    pub parsers: ParserTable,
    pub config: Value,
    pub context: Arc<ContextView>,
}

impl fmt::Debug for RouteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRecord")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("context", &self.context.name)
            .field("schemas", &self.schemas)
            .finish_non_exhaustive()
    }
}

/// Concatenate a context prefix and a route path.
///
/// `/` under a non-empty prefix is the bare prefix.
pub(crate) fn join_prefix(prefix: &str, url: &str) -> String {
    if prefix.is_empty() {
        return if url.starts_with('/') {
            url.to_string()
        } else {
            format!("/{url}")
        };
    }
    match url {
        "" | "/" => prefix.to_string(),
        u if u.starts_with('/') => format!("{prefix}{u}"),
        u => format!("{prefix}/{u}"),
    }
}

/// Normalize a plugin prefix: leading `/`, no trailing `/`, empty for root.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
