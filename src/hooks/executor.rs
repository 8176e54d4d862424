//! Hook pipeline executor.
//!
//! Runs the callbacks of one lifecycle point one after another, awaiting each
//! before starting the next. Between callbacks it checks two things:
//!
//! - the abort signal: a vanished client stops the pipeline ([`Halt::Aborted`]);
//! - the reply: once a callback sent it, nothing else runs ([`Halt::Sent`]).
//!
//! A failing callback stops the point immediately ([`Halt::Failed`]). Panics are
//! caught and reported as `Internal` errors, the same way the dispatcher turns a
//! panicking handler into a 500.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, trace};

use super::{
    HookPoint, OnErrorHookFn, OnRouteHookFn, OnSendHookFn, PreSerializationHookFn, RequestHookFn,
};
use crate::error::{FrameworkError, Result};
use crate::reply::Reply;
use crate::request::Request;
use crate::route::RouteOptions;

/// Why the pipeline stopped before producing its normal output.
#[derive(Debug)]
pub enum Halt {
    /// A callback sent the reply.
    Sent,
    /// The client went away.
    Aborted,
    /// A callback, parser, validator or handler failed.
    Failed(FrameworkError),
}

impl From<FrameworkError> for Halt {
    fn from(err: FrameworkError) -> Self {
        Halt::Failed(err)
    }
}

/// Await a user future, turning a panic into an `Internal` error.
pub async fn guarded<T>(label: &str, fut: BoxFuture<'static, Result<T>>) -> Result<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            // H3: callback panic caught
            error!(callback = label, panic_message = %message, "Callback panicked");
            Err(FrameworkError::Internal(format!("{label} panicked: {message}")))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Stop if the client is gone or the reply was sent.
pub fn checkpoint(request: &Request, reply: &Reply) -> std::result::Result<(), Halt> {
    if request.is_aborted() {
        return Err(Halt::Aborted);
    }
    if reply.is_sent() {
        return Err(Halt::Sent);
    }
    Ok(())
}

/// Run `onRequest`, `preParsing`, `preValidation` or `preHandler` callbacks.
pub async fn run_request_hooks(
    point: HookPoint,
    hooks: &[RequestHookFn],
    request: &Request,
    reply: &Reply,
) -> std::result::Result<(), Halt> {
    for (index, hook) in hooks.iter().enumerate() {
        checkpoint(request, reply)?;
        // H1: hook start
        trace!(hook_point = %point, index, "Running hook");
        guarded(point.as_str(), hook(request.clone(), reply.clone()))
            .await
            .map_err(|err| failed(point, index, err))?;
    }
    checkpoint(request, reply)
}

/// Thread the payload through `preSerialization` callbacks.
pub async fn run_pre_serialization(
    hooks: &[PreSerializationHookFn],
    request: &Request,
    reply: &Reply,
    mut payload: Value,
) -> std::result::Result<Value, Halt> {
    let point = HookPoint::PreSerialization;
    for (index, hook) in hooks.iter().enumerate() {
        checkpoint(request, reply)?;
        trace!(hook_point = %point, index, "Running hook");
        payload = guarded(point.as_str(), hook(request.clone(), reply.clone(), payload))
            .await
            .map_err(|err| failed(point, index, err))?;
    }
    checkpoint(request, reply)?;
    Ok(payload)
}

/// Thread the serialized body through `onSend` callbacks.
pub async fn run_on_send(
    hooks: &[OnSendHookFn],
    request: &Request,
    reply: &Reply,
    mut body: Bytes,
) -> std::result::Result<Bytes, Halt> {
    let point = HookPoint::OnSend;
    for (index, hook) in hooks.iter().enumerate() {
        checkpoint(request, reply)?;
        trace!(hook_point = %point, index, "Running hook");
        body = guarded(point.as_str(), hook(request.clone(), reply.clone(), body))
            .await
            .map_err(|err| failed(point, index, err))?;
    }
    checkpoint(request, reply)?;
    Ok(body)
}

/// Run `onError` callbacks for `err`.
///
/// Unlike the other points this chain also runs for aborted requests, so it only
/// stops early when a callback sends the reply or fails.
pub async fn run_on_error(
    hooks: &[OnErrorHookFn],
    request: &Request,
    reply: &Reply,
    err: &FrameworkError,
) -> std::result::Result<(), Halt> {
    let point = HookPoint::OnError;
    for (index, hook) in hooks.iter().enumerate() {
        if reply.is_sent() {
            return Err(Halt::Sent);
        }
        trace!(hook_point = %point, index, "Running hook");
        guarded(
            point.as_str(),
            hook(request.clone(), reply.clone(), err.clone()),
        )
        .await
        .map_err(|e| failed(point, index, e))?;
    }
    if reply.is_sent() {
        return Err(Halt::Sent);
    }
    Ok(())
}

/// Run `onRoute` callbacks; each sees the previous one's changes.
pub fn run_on_route(hooks: &[OnRouteHookFn], options: &mut RouteOptions) -> Result<()> {
    for hook in hooks {
        hook(options)?;
    }
    Ok(())
}

fn failed(point: HookPoint, index: usize, err: FrameworkError) -> Halt {
    // H2: hook failed
    debug!(hook_point = %point, index, error = %err, "Hook failed");
    Halt::Failed(err)
}
