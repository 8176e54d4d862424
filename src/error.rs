//! # Error Module
//!
//! A single error type covers the whole framework. Variants fall into three groups:
//!
//! - **Registration errors** are returned from registration calls or from
//!   [`Instance::ready`](crate::Instance::ready). They are always fatal to the call.
//! - **Request-scoped errors** travel through the `onError` hook chain of the owning
//!   context and finally through the active error handler. Each carries an HTTP
//!   status via [`FrameworkError::status_code`].
//! - **Process errors** come from `listen` or configuration loading.
//!
//! The type is `Clone` so the cached `ready()` outcome can be handed to every caller
//! and so `onError` hooks can observe the error while the error handler owns it.

use http::StatusCode;
use thiserror::Error;

use crate::decorator::DecoratorTarget;
use crate::validator::ValidationIssue;

/// Result alias used throughout the crate.
pub type Result<T, E = FrameworkError> = std::result::Result<T, E>;

/// Every failure the framework can report.
#[derive(Debug, Clone, Error)]
pub enum FrameworkError {
    /// A decorator with this name is already visible on the target.
    #[error("decorator '{name}' has already been added to {target}")]
    DuplicateDecorator {
        target: DecoratorTarget,
        name: String,
    },

    /// A declared decorator dependency is not visible on the same target.
    #[error("decorator '{name}' on {target} depends on '{dependency}', which is not present")]
    MissingDecoratorDependency {
        target: DecoratorTarget,
        name: String,
        dependency: String,
    },

    /// The (method, normalized path) pair is already registered.
    #[error("method '{method}' already declared for route '{path}'")]
    DuplicateRoute { method: String, path: String },

    /// The route pattern could not be parsed.
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidRoutePattern { pattern: String, reason: String },

    /// A registration call arrived after the context tree was frozen.
    #[error("cannot {operation}: instance already started")]
    AlreadyStarted { operation: &'static str },

    /// A parser for this media type is already visible.
    #[error("content type parser for '{0}' already present")]
    DuplicateContentTypeParser(String),

    /// A shared schema with this `$id` is already visible.
    #[error("schema with id '{0}' already declared")]
    DuplicateSchema(String),

    /// Shared schemas must carry a string `$id`.
    #[error("shared schema is missing a string '$id'")]
    MissingSchemaId,

    /// The schema compiler rejected a schema.
    #[error("failed to compile {part} schema for '{route}': {message}")]
    SchemaCompilation {
        route: String,
        part: String,
        message: String,
    },

    /// A plugin's registration work failed.
    #[error("plugin '{plugin}' failed to load: {message}")]
    PluginFailed { plugin: String, message: String },

    /// A plugin's registration work did not settle in time.
    #[error("plugin '{plugin}' did not finish loading within {timeout_ms}ms")]
    PluginTimeout { plugin: String, timeout_ms: u64 },

    /// An operation requires a successful `ready()` first.
    #[error("instance is not ready")]
    NotReady,

    /// The instance has been closed.
    #[error("instance is closed")]
    Closed,

    /// No route matched; used by the default not-found handler.
    #[error("Route {method}:{path} not found")]
    NotFound { method: String, path: String },

    /// No parser handles the request's content type.
    #[error("Unsupported Media Type: {0}")]
    UnsupportedMediaType(String),

    /// The body exceeds the configured limit.
    #[error("Request body is too large (limit {limit} bytes)")]
    PayloadTooLarge { limit: usize },

    /// The body could not be materialized.
    #[error("{0}")]
    BadRequest(String),

    /// A compiled schema rejected request input.
    #[error("{part} validation failed: {}", join_issues(.issues))]
    Validation {
        part: String,
        issues: Vec<ValidationIssue>,
    },

    /// The outgoing payload could not be serialized or failed its response schema.
    #[error("failed to serialize response: {0}")]
    Serialization(String),

    /// A path parameter exceeded `max_param_length`.
    #[error("URI Too Long")]
    UriTooLong,

    /// An error carrying an explicit HTTP status, raised by user code.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// Anything else that went wrong while processing a request.
    #[error("{0}")]
    Internal(String),

    /// The connection went away before a response was sent.
    #[error("request aborted by the client")]
    RequestAborted,

    /// Binding or serving failed.
    #[error("failed to listen on {address}: {message}")]
    Listen { address: String, message: String },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl FrameworkError {
    /// Build an error that is delivered with the given HTTP status.
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status: status.as_u16(),
            message: message.into(),
        }
    }

    /// HTTP status this error is delivered with when nobody handles it.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadRequest(_) | Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::UriTooLong => StatusCode::URI_TOO_LONG,
            Self::Http { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors raised while registering plugins, routes, hooks or decorators.
    #[must_use]
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateDecorator { .. }
                | Self::MissingDecoratorDependency { .. }
                | Self::DuplicateRoute { .. }
                | Self::InvalidRoutePattern { .. }
                | Self::AlreadyStarted { .. }
                | Self::DuplicateContentTypeParser(_)
                | Self::DuplicateSchema(_)
                | Self::MissingSchemaId
                | Self::SchemaCompilation { .. }
                | Self::PluginFailed { .. }
                | Self::PluginTimeout { .. }
        )
    }
}

impl From<anyhow::Error> for FrameworkError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for FrameworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            FrameworkError::UnsupportedMediaType("a/b".into()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            FrameworkError::http(StatusCode::IM_A_TEAPOT, "tea").status_code(),
            StatusCode::IM_A_TEAPOT
        );
        assert_eq!(
            FrameworkError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            FrameworkError::Http {
                status: 42,
                message: "nonsense".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_anyhow_conversion_is_internal() {
        let err: FrameworkError = anyhow::anyhow!("db down").into();
        assert!(matches!(err, FrameworkError::Internal(ref m) if m == "db down"));
    }

    #[test]
    fn test_registration_classification() {
        assert!(FrameworkError::DuplicateRoute {
            method: "GET".into(),
            path: "/".into()
        }
        .is_registration_error());
        assert!(!FrameworkError::UriTooLong.is_registration_error());
    }
}
