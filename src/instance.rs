//! # Instance
//!
//! [`Instance`] is the handle user code works with. The root instance is created
//! with [`Instance::new`]; every plugin receives a handle scoped to the child
//! context its registration created. All handles of one tree share the same
//! arena, configuration and (after `ready()`) the same frozen application.
//!
//! Registration methods return `Result<&Self>` so calls chain with `?`:
//!
//! ```rust,ignore
//! let app = Instance::new();
//! app.decorate("version", json!("1.0"))?
//!     .get("/health", |_req, _reply| async { Ok(json!({"status": "ok"})) })?;
//! app.ready().await?;
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use http::Method;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, error, info};

use crate::config::FrameworkConfig;
use crate::content_type;
use crate::context::{self, ContextId, LifecycleState, PluginFn, PluginOptions, Registry, ROOT};
use crate::decorator::{DecoratorTarget, DecoratorValue};
use crate::error::{FrameworkError, Result};
use crate::hooks::executor::guarded;
use crate::hooks::{Hook, OnCloseHookFn};
use crate::inject::{InjectRequest, InjectResponse};
use crate::lifecycle::{self, App};
use crate::reply::Reply;
use crate::request::Request;
use crate::route::{self, RouteOptions};
use crate::router::{Pattern, SUPPORTED_METHODS};
use crate::schema::SchemaCompiler;
use crate::server::{self, ListenOptions};

/// State shared by every handle of one tree.
pub(crate) struct Shared {
    pub registry: Mutex<Registry>,
    pub config: FrameworkConfig,
    /// Outcome of the one and only `ready()` run.
    pub app: OnceCell<Result<Arc<App>>>,
    pub closed: AtomicBool,
    pub shutdown: watch::Sender<bool>,
}

/// Handle to one context of the encapsulation tree.
#[derive(Clone)]
pub struct Instance {
    shared: Arc<Shared>,
    id: ContextId,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.shared.registry.lock();
        let node = registry.node(self.id);
        f.debug_struct("Instance")
            .field("context", &self.id)
            .field("name", &node.name)
            .field("prefix", &node.prefix)
            .field("state", &registry.state)
            .finish()
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

impl Instance {
    /// Root instance with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(FrameworkConfig::default())
    }

    #[must_use]
    pub fn with_config(config: FrameworkConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let shared = Shared {
            registry: Mutex::new(Registry::new()),
            config,
            app: OnceCell::new(),
            closed: AtomicBool::new(false),
            shutdown,
        };
        Self::from_parts(Arc::new(shared), ROOT)
    }

    pub(crate) fn from_parts(shared: Arc<Shared>, id: ContextId) -> Self {
        Self { shared, id }
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.shared.config
    }

    /// Accumulated route prefix of this context; empty for the root.
    #[must_use]
    pub fn prefix(&self) -> String {
        self.shared.registry.lock().node(self.id).prefix.clone()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.shared.registry.lock().node(self.id).name.clone()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.shared.registry.lock().state
    }

    /// Run `f` against this context's node once registration is known to be open.
    fn registering<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Registry, ContextId) -> Result<T>,
    ) -> Result<T> {
        let mut registry = self.shared.registry.lock();
        registry.ensure_open(operation)?;
        f(&mut registry, self.id)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a plugin in a new child context.
    ///
    /// The plugin runs during `ready()`, after every plugin registered before it
    /// at shallower depth, and receives a handle to the child context.
    pub fn register<F, Fut>(&self, plugin: F, options: PluginOptions) -> Result<&Self>
    where
        F: FnOnce(Instance, PluginOptions) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registering("register", |registry, id| {
            let plugin: PluginFn =
                Box::new(move |instance: Instance, opts: PluginOptions| plugin(instance, opts).boxed());
            let child = registry.add_child(id, plugin, options);
            let node = registry.node(child);
            debug!(parent = id, context = child, plugin = %node.name, prefix = %node.prefix, "Plugin registered");
            Ok(())
        })?;
        Ok(self)
    }

    /// Add an instance decorator visible to this context and its descendants.
    pub fn decorate(&self, name: &str, value: impl Into<DecoratorValue>) -> Result<&Self> {
        self.decorate_with(DecoratorTarget::Instance, name, value, &[])
    }

    /// Declare a per-request field with its default value.
    pub fn decorate_request(&self, name: &str, value: impl Into<DecoratorValue>) -> Result<&Self> {
        self.decorate_with(DecoratorTarget::Request, name, value, &[])
    }

    /// Declare a per-reply field with its default value.
    pub fn decorate_reply(&self, name: &str, value: impl Into<DecoratorValue>) -> Result<&Self> {
        self.decorate_with(DecoratorTarget::Reply, name, value, &[])
    }

    /// Add a decorator that requires `dependencies` to be visible on the same target.
    ///
    /// # Errors
    ///
    /// `DuplicateDecorator` when the name is already visible here,
    /// `MissingDecoratorDependency` when a dependency is not.
    pub fn decorate_with(
        &self,
        target: DecoratorTarget,
        name: &str,
        value: impl Into<DecoratorValue>,
        dependencies: &[&str],
    ) -> Result<&Self> {
        let value = value.into();
        self.registering("decorate", |registry, id| {
            registry.decorate(id, target, name, value, dependencies)
        })?;
        Ok(self)
    }

    /// Attach a hook to this context; descendants inherit it.
    pub fn add_hook(&self, hook: Hook) -> Result<&Self> {
        let point = hook.point();
        self.registering("add_hook", |registry, id| {
            registry.node_mut(id).hooks.add(hook);
            Ok(())
        })?;
        debug!(context = self.id, hook_point = %point, "Hook added");
        Ok(self)
    }

    /// Add a shared schema, referenced from route schemas as `{"$ref": "<id>#"}`.
    pub fn add_schema(&self, schema: Value) -> Result<&Self> {
        self.registering("add_schema", |registry, id| registry.add_schema(id, schema))?;
        Ok(self)
    }

    /// Replace the schema compiler for this context's subtree.
    pub fn set_schema_compiler(&self, compiler: impl SchemaCompiler + 'static) -> Result<&Self> {
        self.registering("set_schema_compiler", |registry, id| {
            registry.node_mut(id).compiler = Some(Arc::new(compiler));
            Ok(())
        })?;
        Ok(self)
    }

    /// Add a body parser for `media_type` (or `*` for everything unmatched).
    pub fn add_content_type_parser<F, Fut>(&self, media_type: &str, f: F) -> Result<&Self>
    where
        F: Fn(Request, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let parser = content_type::parser(f);
        self.registering("add_content_type_parser", |registry, id| {
            registry.add_content_type_parser(id, media_type, parser)
        })?;
        Ok(self)
    }

    /// Handle errors raised by routes of this context's subtree.
    pub fn set_error_handler<F, Fut>(&self, f: F) -> Result<&Self>
    where
        F: Fn(FrameworkError, Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler = lifecycle::error_handler(f);
        self.registering("set_error_handler", |registry, id| {
            registry.node_mut(id).error_handler = Some(handler);
            Ok(())
        })?;
        Ok(self)
    }

    /// Serve unmatched paths under this context's prefix.
    pub fn set_not_found_handler<F, Fut>(&self, f: F) -> Result<&Self>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler = route::handler(f);
        self.registering("set_not_found_handler", |registry, id| {
            registry.node_mut(id).not_found = Some(handler);
            Ok(())
        })?;
        Ok(self)
    }

    /// Declare a route. It is registered with the router during `ready()`, after
    /// this context's `onRoute` hooks have seen it.
    ///
    /// # Errors
    ///
    /// `InvalidRoutePattern` is reported immediately; `DuplicateRoute` and schema
    /// compilation errors surface from `ready()`.
    pub fn route(&self, options: RouteOptions) -> Result<&Self> {
        let case_sensitive = self.shared.config.router.case_sensitive;
        // Same join as `ready()` uses, so a relative url is valid at both points.
        Pattern::parse(&route::join_prefix("", &options.url), case_sensitive)?;
        if let Some(method) = options
            .methods
            .iter()
            .find(|m| !SUPPORTED_METHODS.contains(m))
        {
            return Err(FrameworkError::InvalidRoutePattern {
                pattern: options.url.clone(),
                reason: format!("unsupported method {method}"),
            });
        }
        self.registering("route", |registry, id| {
            let node = registry.node_mut(id);
            debug!(context = id, methods = ?options.methods, url = %options.url, "Route declared");
            node.routes.push(options);
            Ok(())
        })?;
        Ok(self)
    }

    pub fn get<F, Fut>(&self, url: &str, f: F) -> Result<&Self>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.route(RouteOptions::new(Method::GET, url, f))
    }

    pub fn head<F, Fut>(&self, url: &str, f: F) -> Result<&Self>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.route(RouteOptions::new(Method::HEAD, url, f))
    }

    pub fn post<F, Fut>(&self, url: &str, f: F) -> Result<&Self>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.route(RouteOptions::new(Method::POST, url, f))
    }

    pub fn put<F, Fut>(&self, url: &str, f: F) -> Result<&Self>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.route(RouteOptions::new(Method::PUT, url, f))
    }

    pub fn delete<F, Fut>(&self, url: &str, f: F) -> Result<&Self>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.route(RouteOptions::new(Method::DELETE, url, f))
    }

    pub fn options<F, Fut>(&self, url: &str, f: F) -> Result<&Self>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.route(RouteOptions::new(Method::OPTIONS, url, f))
    }

    pub fn patch<F, Fut>(&self, url: &str, f: F) -> Result<&Self>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.route(RouteOptions::new(Method::PATCH, url, f))
    }

    /// Register `f` for every supported method.
    pub fn all<F, Fut>(&self, url: &str, f: F) -> Result<&Self>
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.route(RouteOptions::new(Method::GET, url, f).methods(SUPPORTED_METHODS))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[must_use]
    pub fn has_decorator(&self, name: &str) -> bool {
        self.shared
            .registry
            .lock()
            .has_decorator(self.id, DecoratorTarget::Instance, name)
    }

    #[must_use]
    pub fn has_request_decorator(&self, name: &str) -> bool {
        self.shared
            .registry
            .lock()
            .has_decorator(self.id, DecoratorTarget::Request, name)
    }

    #[must_use]
    pub fn has_reply_decorator(&self, name: &str) -> bool {
        self.shared
            .registry
            .lock()
            .has_decorator(self.id, DecoratorTarget::Reply, name)
    }

    /// Nearest visible instance decoration.
    #[must_use]
    pub fn decoration(&self, name: &str) -> Option<DecoratorValue> {
        self.shared.registry.lock().decoration(self.id, name)
    }

    #[must_use]
    pub fn decoration_json(&self, name: &str) -> Option<Value> {
        self.decoration(name)
            .and_then(|v| v.as_json().cloned())
    }

    /// Typed view of a decoration added with [`DecoratorValue::shared`].
    #[must_use]
    pub fn decoration_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.decoration(name).and_then(|v| v.downcast::<T>())
    }

    /// Shared schemas visible here, keyed by `$id`.
    #[must_use]
    pub fn get_schemas(&self) -> BTreeMap<String, Value> {
        self.shared.registry.lock().schemas(self.id)
    }

    #[must_use]
    pub fn has_content_type_parser(&self, media_type: &str) -> bool {
        self.shared
            .registry
            .lock()
            .has_content_type_parser(self.id, &content_type::normalize_media_type(media_type))
    }

    // ------------------------------------------------------------------
    // Process control
    // ------------------------------------------------------------------

    /// Load every plugin and register every route.
    ///
    /// Runs once; later calls (from any handle) return the cached outcome.
    ///
    /// # Errors
    ///
    /// The first registration or plugin error, or `Closed` after `close()`.
    pub async fn ready(&self) -> Result<()> {
        self.app().await.map(|_| ())
    }

    pub(crate) async fn app(&self) -> Result<Arc<App>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(FrameworkError::Closed);
        }
        self.shared
            .app
            .get_or_init(|| context::load(Arc::clone(&self.shared)))
            .await
            .clone()
    }

    /// Dispatch a simulated request through the full pipeline without a socket.
    ///
    /// Calls `ready()` first if needed.
    ///
    /// # Errors
    ///
    /// Any `ready()` error, `BadRequest` for malformed request parts and
    /// `RequestAborted` when the request's abort signal fired.
    pub async fn inject(&self, request: InjectRequest) -> Result<InjectResponse> {
        let app = self.app().await?;
        let raw = request.into_raw()?;
        app.handle(raw)
            .await
            .map(InjectResponse::from)
            .ok_or(FrameworkError::RequestAborted)
    }

    /// Bind and serve HTTP/1.1 until `close()`.
    ///
    /// Returns the bound address (useful with port `0`).
    pub async fn listen(&self, options: ListenOptions) -> Result<SocketAddr> {
        let app = self.app().await?;
        server::listen(app, &options, self.shared.shutdown.subscribe()).await
    }

    /// Stop accepting connections and run `onClose` hooks, children before parents.
    ///
    /// Idempotent. Every hook runs; the first error is returned.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.shutdown.send_replace(true);

        let hooks: Vec<(ContextId, Vec<OnCloseHookFn>)> = {
            let mut registry = self.shared.registry.lock();
            registry.state = LifecycleState::Closed;
            let mut order = registry.bfs_order();
            order.reverse();
            order
                .into_iter()
                .map(|id| (id, registry.node(id).hooks.on_close.clone()))
                .collect()
        };

        let mut first_error = None;
        for (id, callbacks) in hooks {
            for callback in callbacks {
                let instance = Instance::from_parts(Arc::clone(&self.shared), id);
                if let Err(err) = guarded("onClose", callback(instance)).await {
                    error!(context = id, error = %err, "onClose hook failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        info!("Instance closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Route table as text.
    ///
    /// # Errors
    ///
    /// `NotReady` unless `ready()` has succeeded.
    pub fn print_routes(&self) -> Result<String> {
        match self.shared.app.get() {
            Some(Ok(app)) => Ok(app.router().print_routes()),
            _ => Err(FrameworkError::NotReady),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_chains() {
        let app = Instance::new();
        app.decorate("a", json!(1))
            .unwrap()
            .decorate_request("user", Value::Null)
            .unwrap()
            .get("/", |_req, _reply| async { Ok(json!("hi")) })
            .unwrap();
        assert!(app.has_decorator("a"));
        assert!(app.has_request_decorator("user"));
        assert!(!app.has_reply_decorator("user"));
        assert_eq!(app.state(), LifecycleState::Registering);
    }

    #[test]
    fn test_invalid_pattern_fails_at_declaration() {
        let app = Instance::new();
        let err = app
            .get("/files/*rest/more", |_req, _reply| async { Ok(Value::Null) })
            .unwrap_err();
        assert!(matches!(err, FrameworkError::InvalidRoutePattern { .. }));
    }

    #[tokio::test]
    async fn test_ready_freezes_registration() {
        let app = Instance::new();
        app.ready().await.unwrap();
        assert_eq!(app.state(), LifecycleState::Ready);
        let err = app.decorate("late", json!(1)).unwrap_err();
        assert!(matches!(err, FrameworkError::AlreadyStarted { operation: "decorate" }));
    }

    #[tokio::test]
    async fn test_print_routes_requires_ready() {
        let app = Instance::new();
        app.get("/a", |_req, _reply| async { Ok(Value::Null) }).unwrap();
        assert!(matches!(app.print_routes(), Err(FrameworkError::NotReady)));
        app.ready().await.unwrap();
        assert!(app.print_routes().unwrap().contains("/a"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let app = Instance::new();
        app.close().await.unwrap();
        app.close().await.unwrap();
        assert_eq!(app.state(), LifecycleState::Closed);
        assert!(matches!(app.ready().await, Err(FrameworkError::Closed)));
    }
}
