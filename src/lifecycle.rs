//! Request lifecycle - hot path for request dispatch.
//!
//! One request flows through:
//!
//! ```text
//! route lookup ─► onRequest ─► preParsing ─► body parse ─► preValidation ─► validate
//!              ─► preHandler ─► handler ─► preSerialization ─► response schema + serialize
//!              ─► onSend ─► write
//! ```
//!
//! Any failure leaves the normal path and goes to the owning context's `onError`
//! chain, then to the nearest error handler (or the default one), whose payload is
//! serialized and passed through `onSend`. A request with no matching route is
//! served by the not-found handler of the context with the longest prefix covering
//! the path; it runs `onRequest`, `preHandler`, `preSerialization` and `onSend`.
//!
//! The pipeline stops early when a callback sends the reply, and abandons the
//! request (no response, one `onError` call with `RequestAborted`) when the host
//! reports the client gone.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::FrameworkConfig;
use crate::content_type::ParserTable;
use crate::context::ContextView;
use crate::decorator::Decorations;
use crate::error::{FrameworkError, Result};
use crate::hooks::executor::{
    checkpoint, guarded, run_on_error, run_on_send, run_pre_serialization, run_request_hooks,
    Halt,
};
use crate::hooks::{HookLists, HookPoint};
use crate::reply::{RawResponse, Reply};
use crate::request::{RawRequest, Request, RequestId};
use crate::route::RouteRecord;
use crate::router::{ParamVec, Router};
use crate::schema::CompiledSchemas;

/// Custom error handler installed with `set_error_handler`; returns the payload.
pub type ErrorHandler =
    Arc<dyn Fn(FrameworkError, Request, Reply) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap an async closure as an [`ErrorHandler`].
pub fn error_handler<F, Fut>(f: F) -> ErrorHandler
where
    F: Fn(FrameworkError, Request, Reply) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |err: FrameworkError, req: Request, reply: Reply| f(err, req, reply).boxed())
}

/// `{"statusCode", "error", "message"}` body used by the default handlers.
#[must_use]
pub fn error_payload(status: StatusCode, err: &FrameworkError) -> Value {
    json!({
        "statusCode": status.as_u16(),
        "error": status.canonical_reason().unwrap_or("Unknown Error"),
        "message": err.to_string(),
    })
}

/// Response for an error raised before the pipeline could start.
#[must_use]
pub fn bare_error_response(err: &FrameworkError) -> RawResponse {
    let reply = Reply::new(Decorations::default());
    let status = err.status_code();
    reply.code(status);
    match reply.serialize(&error_payload(status, err)) {
        Ok(body) => reply.to_response(body),
        Err(_) => RawResponse::internal_error(),
    }
}

/// The frozen application: router plus one view per context.
pub(crate) struct App {
    router: Router<RouteRecord>,
    root: Arc<ContextView>,
    /// Contexts with their own not-found handler, longest prefix first.
    not_found: Vec<Arc<ContextView>>,
    config: FrameworkConfig,
}

impl App {
    /// `contexts` is indexed by context id; the root comes first.
    pub fn new(
        router: Router<RouteRecord>,
        root: Arc<ContextView>,
        contexts: &[Arc<ContextView>],
        config: FrameworkConfig,
    ) -> Self {
        let mut not_found: Vec<Arc<ContextView>> = contexts
            .iter()
            .filter(|c| c.not_found.is_some())
            .cloned()
            .collect();
        not_found.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            router,
            root,
            not_found,
            config,
        }
    }

    pub fn router(&self) -> &Router<RouteRecord> {
        &self.router
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    /// Run one request through the pipeline.
    ///
    /// Returns `None` when the request was abandoned because the client went away.
    pub async fn handle(&self, raw: RawRequest) -> Option<RawResponse> {
        let upstream_id = raw
            .headers
            .get(self.config.request_id_header.as_str())
            .and_then(|v| v.to_str().ok());
        let id = RequestId::from_header_or_new(upstream_id);
        let span = info_span!("request", request_id = %id, method = %raw.method, url = %raw.url);
        self.dispatch(id, raw).instrument(span).await
    }

    async fn dispatch(&self, id: RequestId, raw: RawRequest) -> Option<RawResponse> {
        let started = Instant::now();

        let response = match self.router.find(&raw.method, raw.path()) {
            Some(matched) => {
                let record = matched.value;
                let too_long = matched
                    .params
                    .iter()
                    .any(|(_, v)| v.len() > self.config.router.max_param_length);
                let context = Arc::clone(&record.context);
                let request = Request::new(
                    id,
                    raw,
                    matched.params,
                    Arc::clone(&context),
                    Some(Arc::clone(&record)),
                );
                let reply = Reply::new(Decorations::new(Arc::clone(&context.decorators.reply)));
                let outcome = if too_long {
                    Err(Halt::Failed(FrameworkError::UriTooLong))
                } else {
                    self.run_route(&request, &reply, &record).await
                };
                self.finish(&request, &reply, &record.hooks, &context, outcome)
                    .await
            }
            None => {
                let context = self.not_found_context(raw.path());
                let request = Request::new(id, raw, ParamVec::new(), Arc::clone(&context), None);
                let reply = Reply::new(Decorations::new(Arc::clone(&context.decorators.reply)));
                let outcome = self.run_not_found(&request, &reply, &context).await;
                self.finish(&request, &reply, &context.hooks, &context, outcome)
                    .await
            }
        };

        match &response {
            // L1: request completed
            Some(r) => info!(
                status = r.status.as_u16(),
                duration_us = started.elapsed().as_micros(),
                "Request completed"
            ),
            // L2: request abandoned
            None => warn!(
                duration_us = started.elapsed().as_micros(),
                "Request aborted by client; response dropped"
            ),
        }
        response
    }

    fn not_found_context(&self, path: &str) -> Arc<ContextView> {
        Arc::clone(
            self.not_found
                .iter()
                .find(|c| c.covers(path))
                .unwrap_or(&self.root),
        )
    }

    async fn run_route(
        &self,
        request: &Request,
        reply: &Reply,
        record: &RouteRecord,
    ) -> std::result::Result<Bytes, Halt> {
        let hooks = &record.hooks;
        run_request_hooks(HookPoint::OnRequest, &hooks.on_request, request, reply).await?;
        run_request_hooks(HookPoint::PreParsing, &hooks.pre_parsing, request, reply).await?;

        let body = self.parse_body(request, &record.parsers).await?;
        request.set_body(body);

        run_request_hooks(HookPoint::PreValidation, &hooks.pre_validation, request, reply).await?;
        validate(request, &record.schemas)?;
        run_request_hooks(HookPoint::PreHandler, &hooks.pre_handler, request, reply).await?;

        // H4: handler invocation
        debug!(route = %record.url, "Invoking handler");
        let payload = guarded("handler", (record.handler)(request.clone(), reply.clone())).await?;
        checkpoint(request, reply)?;

        finish_payload(request, reply, hooks, payload, Some(&record.schemas)).await
    }

    async fn run_not_found(
        &self,
        request: &Request,
        reply: &Reply,
        context: &ContextView,
    ) -> std::result::Result<Bytes, Halt> {
        let hooks = &context.hooks;
        run_request_hooks(HookPoint::OnRequest, &hooks.on_request, request, reply).await?;
        run_request_hooks(HookPoint::PreHandler, &hooks.pre_handler, request, reply).await?;

        reply.code(StatusCode::NOT_FOUND);
        let payload = match &context.not_found {
            Some(handler) => {
                guarded("notFoundHandler", handler(request.clone(), reply.clone())).await?
            }
            None => error_payload(
                StatusCode::NOT_FOUND,
                &FrameworkError::NotFound {
                    method: request.method().to_string(),
                    path: request.path().to_string(),
                },
            ),
        };
        checkpoint(request, reply)?;

        finish_payload(request, reply, hooks, payload, None).await
    }

    async fn parse_body(&self, request: &Request, parsers: &ParserTable) -> Result<Value> {
        let raw = request.raw_body();
        if raw.is_empty() {
            return Ok(Value::Null);
        }
        if raw.len() > self.config.body_limit {
            return Err(FrameworkError::PayloadTooLarge {
                limit: self.config.body_limit,
            });
        }
        let content_type = request.content_type().unwrap_or_default();
        let parser = parsers
            .lookup(content_type)
            .ok_or_else(|| FrameworkError::UnsupportedMediaType(content_type.to_string()))?;
        guarded("contentTypeParser", parser(request.clone(), raw.clone())).await
    }

    async fn finish(
        &self,
        request: &Request,
        reply: &Reply,
        hooks: &HookLists,
        context: &ContextView,
        outcome: std::result::Result<Bytes, Halt>,
    ) -> Option<RawResponse> {
        match outcome {
            Ok(body) => Some(reply.to_response(body)),
            Err(Halt::Sent) => Some(reply.sent_response()),
            Err(Halt::Aborted) => {
                abandon(request, reply, hooks).await;
                None
            }
            Err(Halt::Failed(err)) => handle_error(request, reply, hooks, context, err).await,
        }
    }
}

fn validate(request: &Request, schemas: &CompiledSchemas) -> Result<()> {
    if let Some(params) = schemas.check_params(request.raw_params())? {
        request.set_params(params);
    }
    schemas.check_body(&request.body())?;
    if let Some(query) = schemas.check_querystring(request.raw_query())? {
        request.set_query(query);
    }
    schemas.check_headers(
        request
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str(), v.to_str().ok()?))),
    )?;
    Ok(())
}

async fn finish_payload(
    request: &Request,
    reply: &Reply,
    hooks: &HookLists,
    payload: Value,
    schemas: Option<&CompiledSchemas>,
) -> std::result::Result<Bytes, Halt> {
    let payload = run_pre_serialization(&hooks.pre_serialization, request, reply, payload).await?;
    if let Some(schemas) = schemas {
        schemas.check_response(reply.status(), &payload)?;
    }
    let body = reply.serialize(&payload)?;
    run_on_send(&hooks.on_send, request, reply, body).await
}

async fn abandon(request: &Request, reply: &Reply, hooks: &HookLists) {
    if let Err(Halt::Failed(err)) =
        run_on_error(&hooks.on_error, request, reply, &FrameworkError::RequestAborted).await
    {
        debug!(error = %err, "onError hook failed for aborted request");
    }
}

async fn handle_error(
    request: &Request,
    reply: &Reply,
    hooks: &HookLists,
    context: &ContextView,
    err: FrameworkError,
) -> Option<RawResponse> {
    match run_on_error(&hooks.on_error, request, reply, &err).await {
        Ok(()) => {}
        Err(Halt::Sent) => return Some(reply.sent_response()),
        Err(Halt::Aborted) => return None,
        Err(Halt::Failed(hook_err)) => {
            warn!(error = %hook_err, original_error = %err, "onError hook failed");
        }
    }

    reply.code(err.status_code());
    let payload = match &context.error_handler {
        Some(handler) => {
            match guarded("errorHandler", handler(err.clone(), request.clone(), reply.clone()))
                .await
            {
                Ok(payload) => payload,
                Err(handler_err) => {
                    error!(error = %handler_err, original_error = %err, "Error handler failed");
                    reply.code(handler_err.status_code());
                    default_error(reply, &handler_err)
                }
            }
        }
        None => default_error(reply, &err),
    };
    if reply.is_sent() {
        return Some(reply.sent_response());
    }

    let body = match reply.serialize(&payload) {
        Ok(body) => body,
        Err(ser_err) => {
            error!(error = %ser_err, "Failed to serialize error payload");
            return Some(RawResponse::internal_error());
        }
    };
    match run_on_send(&hooks.on_send, request, reply, body).await {
        Ok(body) => Some(reply.to_response(body)),
        Err(Halt::Sent) => Some(reply.sent_response()),
        Err(Halt::Aborted) => None,
        Err(Halt::Failed(send_err)) => {
            error!(error = %send_err, "onSend hook failed while delivering an error");
            Some(RawResponse::internal_error())
        }
    }
}

fn default_error(reply: &Reply, err: &FrameworkError) -> Value {
    let status = reply.status();
    if status.is_server_error() {
        error!(status = status.as_u16(), error = %err, "Request failed");
    } else {
        info!(status = status.as_u16(), error = %err, "Request rejected");
    }
    error_payload(status, err)
}
