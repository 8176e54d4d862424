//! # Hooks
//!
//! Callbacks registered at one of nine lifecycle points. Seven of them run per
//! request, `onRoute` runs while routes are registered and `onClose` runs when the
//! instance shuts down.
//!
//! Request-time callbacks are async and uniform: each returns a boxed future that
//! resolves to `Ok(..)` or an error. Ordering within a point is strictly
//! sequential; see [`executor`] for short-circuit and error semantics.
//!
//! ```rust,ignore
//! app.add_hook(Hook::on_request(|req, _reply| async move {
//!     tracing::info!(url = %req.url(), "incoming");
//!     Ok(())
//! }))?;
//! ```

pub mod executor;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::error::{FrameworkError, Result};
use crate::instance::Instance;
use crate::reply::Reply;
use crate::request::Request;
use crate::route::RouteOptions;

/// The nine lifecycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    OnRequest,
    PreParsing,
    PreValidation,
    PreHandler,
    PreSerialization,
    OnSend,
    OnError,
    OnRoute,
    OnClose,
}

impl HookPoint {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HookPoint::OnRequest => "onRequest",
            HookPoint::PreParsing => "preParsing",
            HookPoint::PreValidation => "preValidation",
            HookPoint::PreHandler => "preHandler",
            HookPoint::PreSerialization => "preSerialization",
            HookPoint::OnSend => "onSend",
            HookPoint::OnError => "onError",
            HookPoint::OnRoute => "onRoute",
            HookPoint::OnClose => "onClose",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type RequestHookFn = Arc<dyn Fn(Request, Reply) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type PreSerializationHookFn =
    Arc<dyn Fn(Request, Reply, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
pub type OnSendHookFn =
    Arc<dyn Fn(Request, Reply, Bytes) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;
pub type OnErrorHookFn =
    Arc<dyn Fn(Request, Reply, FrameworkError) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type OnRouteHookFn = Arc<dyn Fn(&mut RouteOptions) -> Result<()> + Send + Sync>;
pub type OnCloseHookFn = Arc<dyn Fn(Instance) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A callback bound to its lifecycle point.
#[derive(Clone)]
pub enum Hook {
    OnRequest(RequestHookFn),
    PreParsing(RequestHookFn),
    PreValidation(RequestHookFn),
    PreHandler(RequestHookFn),
    PreSerialization(PreSerializationHookFn),
    OnSend(OnSendHookFn),
    OnError(OnErrorHookFn),
    OnRoute(OnRouteHookFn),
    OnClose(OnCloseHookFn),
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook({})", self.point())
    }
}

fn request_hook<F, Fut>(f: F) -> RequestHookFn
where
    F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |req: Request, reply: Reply| f(req, reply).boxed())
}

impl Hook {
    pub fn on_request<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Hook::OnRequest(request_hook(f))
    }

    pub fn pre_parsing<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Hook::PreParsing(request_hook(f))
    }

    pub fn pre_validation<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Hook::PreValidation(request_hook(f))
    }

    pub fn pre_handler<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Hook::PreHandler(request_hook(f))
    }

    /// Runs on the handler's payload; the returned value replaces it.
    pub fn pre_serialization<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Hook::PreSerialization(Arc::new(move |req: Request, reply: Reply, payload: Value| {
            f(req, reply, payload).boxed()
        }))
    }

    /// Runs on the serialized bytes; the returned bytes replace them.
    pub fn on_send<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        Hook::OnSend(Arc::new(move |req: Request, reply: Reply, body: Bytes| {
            f(req, reply, body).boxed()
        }))
    }

    pub fn on_error<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Reply, FrameworkError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Hook::OnError(Arc::new(
            move |req: Request, reply: Reply, err: FrameworkError| f(req, reply, err).boxed(),
        ))
    }

    /// Synchronous; may rewrite the route before it is registered.
    pub fn on_route<F>(f: F) -> Self
    where
        F: Fn(&mut RouteOptions) -> Result<()> + Send + Sync + 'static,
    {
        Hook::OnRoute(Arc::new(f))
    }

    /// Receives the instance handle of the context that declared it.
    pub fn on_close<F, Fut>(f: F) -> Self
    where
        F: Fn(Instance) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Hook::OnClose(Arc::new(move |instance: Instance| f(instance).boxed()))
    }

    #[must_use]
    pub fn point(&self) -> HookPoint {
        match self {
            Hook::OnRequest(_) => HookPoint::OnRequest,
            Hook::PreParsing(_) => HookPoint::PreParsing,
            Hook::PreValidation(_) => HookPoint::PreValidation,
            Hook::PreHandler(_) => HookPoint::PreHandler,
            Hook::PreSerialization(_) => HookPoint::PreSerialization,
            Hook::OnSend(_) => HookPoint::OnSend,
            Hook::OnError(_) => HookPoint::OnError,
            Hook::OnRoute(_) => HookPoint::OnRoute,
            Hook::OnClose(_) => HookPoint::OnClose,
        }
    }
}

/// Ordered callbacks per lifecycle point.
#[derive(Clone, Default)]
pub struct HookLists {
    pub on_request: Vec<RequestHookFn>,
    pub pre_parsing: Vec<RequestHookFn>,
    pub pre_validation: Vec<RequestHookFn>,
    pub pre_handler: Vec<RequestHookFn>,
    pub pre_serialization: Vec<PreSerializationHookFn>,
    pub on_send: Vec<OnSendHookFn>,
    pub on_error: Vec<OnErrorHookFn>,
    pub on_route: Vec<OnRouteHookFn>,
    pub on_close: Vec<OnCloseHookFn>,
}

impl fmt::Debug for HookLists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookLists")
            .field("on_request", &self.on_request.len())
            .field("pre_parsing", &self.pre_parsing.len())
            .field("pre_validation", &self.pre_validation.len())
            .field("pre_handler", &self.pre_handler.len())
            .field("pre_serialization", &self.pre_serialization.len())
            .field("on_send", &self.on_send.len())
            .field("on_error", &self.on_error.len())
            .field("on_route", &self.on_route.len())
            .field("on_close", &self.on_close.len())
            .finish()
    }
}

impl HookLists {
    pub fn add(&mut self, hook: Hook) {
        match hook {
            Hook::OnRequest(f) => self.on_request.push(f),
            Hook::PreParsing(f) => self.pre_parsing.push(f),
            Hook::PreValidation(f) => self.pre_validation.push(f),
            Hook::PreHandler(f) => self.pre_handler.push(f),
            Hook::PreSerialization(f) => self.pre_serialization.push(f),
            Hook::OnSend(f) => self.on_send.push(f),
            Hook::OnError(f) => self.on_error.push(f),
            Hook::OnRoute(f) => self.on_route.push(f),
            Hook::OnClose(f) => self.on_close.push(f),
        }
    }

    /// Append `other`'s callbacks after ours, point by point.
    ///
    /// `onClose` is not inherited: each context tears down only what it declared.
    pub fn extend_from(&mut self, other: &HookLists) {
        self.on_request.extend(other.on_request.iter().cloned());
        self.pre_parsing.extend(other.pre_parsing.iter().cloned());
        self.pre_validation.extend(other.pre_validation.iter().cloned());
        self.pre_handler.extend(other.pre_handler.iter().cloned());
        self.pre_serialization
            .extend(other.pre_serialization.iter().cloned());
        self.on_send.extend(other.on_send.iter().cloned());
        self.on_error.extend(other.on_error.iter().cloned());
        self.on_route.extend(other.on_route.iter().cloned());
    }

    /// Concatenate lists ordered root first.
    pub fn resolve<'a>(chain: impl IntoIterator<Item = &'a HookLists>) -> Self {
        let mut merged = HookLists::default();
        for lists in chain {
            merged.extend_from(lists);
        }
        merged
    }

    #[must_use]
    pub fn len(&self, point: HookPoint) -> usize {
        match point {
            HookPoint::OnRequest => self.on_request.len(),
            HookPoint::PreParsing => self.pre_parsing.len(),
            HookPoint::PreValidation => self.pre_validation.len(),
            HookPoint::PreHandler => self.pre_handler.len(),
            HookPoint::PreSerialization => self.pre_serialization.len(),
            HookPoint::OnSend => self.on_send.len(),
            HookPoint::OnError => self.on_error.len(),
            HookPoint::OnRoute => self.on_route.len(),
            HookPoint::OnClose => self.on_close.len(),
        }
    }
}
