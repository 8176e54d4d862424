//! # brrtframe
//!
//! **brrtframe** is an encapsulated, plugin-driven HTTP framework core for Rust: a radix-tree
//! router, a tree of plugin contexts with scoped decorators, hooks, schemas and body parsers,
//! and an async hook pipeline with nine lifecycle points.
//!
//! ## Overview
//!
//! An application is a tree of contexts. The root is created with [`Instance::new`]; every
//! [`Instance::register`] call adds one child context and hands the plugin an [`Instance`]
//! scoped to it. Whatever a context declares (decorators, hooks, error and not-found handlers,
//! shared schemas, content-type parsers) is visible to that context and its descendants, never
//! to its parent or siblings.
//!
//! [`Instance::ready`] loads the plugins breadth-first, freezes the tree and registers every
//! route. After that the application serves requests through [`Instance::inject`] (in process)
//! or [`Instance::listen`] (HTTP/1.1 over tokio and hyper).
//!
//! ## Architecture
//!
//! - **[`router`]** - Radix-tree path matching with static, parametric and wildcard segments
//! - **[`context`]** - Encapsulation tree arena, plugin options and lifecycle states
//! - **[`instance`]** - The user-facing handle: registration, `ready`, `inject`, `listen`, `close`
//! - **[`hooks`]** - Lifecycle hook points, hook lists and the pipeline executor
//! - **[`lifecycle`]** - Per-request pipeline, error handling and not-found dispatch
//! - **[`decorator`]** - Scoped instance, request and reply decorators
//! - **[`schema`]** - Route schemas, shared schemas and the pluggable schema compiler
//! - **[`content_type`]** - Content-type parser registry with a `*` fallback
//! - **[`request`]** / **[`reply`]** - Per-request handles passed to hooks and handlers
//! - **[`server`]** - tokio + hyper host layer with body limits and abort detection
//! - **[`config`]** / **[`logging`]** - File and environment configuration, `tracing` setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as server<br/>(hyper)
//!     participant App as lifecycle::App
//!     participant Router as Router
//!     participant Hooks as Hook pipeline
//!     participant Handler as Route handler
//!
//!     Client->>Server: GET /users/42
//!     Server->>Server: Collect body (body_limit)
//!     Server->>App: handle(RawRequest)
//!     App->>Router: find(GET, /users/42)
//!     Router-->>App: RouteRecord + params {id: "42"}
//!     App->>Hooks: onRequest, preParsing
//!     App->>App: Parse body by content type
//!     App->>Hooks: preValidation
//!     App->>App: Validate params, body, querystring, headers
//!     App->>Hooks: preHandler
//!     App->>Handler: handler(request, reply)
//!     Handler-->>App: payload
//!     App->>Hooks: preSerialization
//!     App->>App: Response schema + serialize
//!     App->>Hooks: onSend
//!     App-->>Server: RawResponse
//!     Server-->>Client: 200 OK
//!
//!     alt Any step fails
//!         App->>Hooks: onError
//!         App->>App: Nearest error handler
//!         App->>Hooks: onSend
//!     end
//! ```
//!
//! ### Key Architectural Patterns
//!
//! 1. **Arena Context Tree**: Contexts refer to each other by index; no reference cycles
//! 2. **Freeze On Ready**: Registration is rejected once `ready()` has run
//! 3. **Sequential Hooks**: Each callback is awaited before the next; sending the reply
//!    short-circuits the rest
//! 4. **Panic Isolation**: A panicking callback becomes a 500, not a dead server
//!
//! ## Quick Start
//!
//! ```no_run
//! use brrtframe::{InjectRequest, Instance, PluginOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> brrtframe::Result<()> {
//!     let app = Instance::new();
//!     app.decorate("greeting", json!("hello"))?;
//!     app.register(
//!         |users: Instance, _opts: PluginOptions| async move {
//!             users.get("/:id", |req, _reply| async move {
//!                 Ok(json!({ "id": req.param("id") }))
//!             })?;
//!             Ok(())
//!         },
//!         PluginOptions::new().prefix("/users"),
//!     )?;
//!
//!     let res = app.inject(InjectRequest::get("/users/42")).await?;
//!     assert_eq!(res.json()?["id"], "42");
//!     app.close().await
//! }
//! ```
//!
//! ## Runtime Considerations
//!
//! - All callbacks are async and run on the tokio runtime
//! - Body size is capped by `body_limit` (`BRRTF_BODY_LIMIT`)
//! - Plugins that do not settle within `plugin_timeout_ms` fail `ready()`
//! - Logging goes through `tracing`; see [`logging`]

pub mod cli;
pub mod config;
pub mod content_type;
pub mod context;
pub mod decorator;
pub mod error;
pub mod hooks;
pub mod inject;
pub mod instance;
pub mod lifecycle;
pub mod logging;
pub mod reply;
pub mod request;
pub mod route;
pub mod router;
pub mod schema;
pub mod server;
pub mod validator;

pub use config::{FrameworkConfig, RouterConfig};
pub use content_type::ContentTypeParser;
pub use context::{ContextView, LifecycleState, PluginOptions};
pub use decorator::{DecoratorTarget, DecoratorValue};
pub use error::{FrameworkError, Result};
pub use hooks::{Hook, HookPoint};
pub use inject::{InjectRequest, InjectResponse};
pub use instance::Instance;
pub use lifecycle::ErrorHandler;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use reply::Reply;
pub use request::{AbortSignal, Request, RequestId};
pub use route::{Handler, RouteOptions};
pub use schema::{JsonSchemaCompiler, RouteSchema, SchemaCompiler, SchemaDefinition};
pub use server::ListenOptions;
pub use validator::{ValidationIssue, Validator};
