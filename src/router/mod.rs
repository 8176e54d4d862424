//! # Router Module
//!
//! Path matching and route resolution for the framework.
//!
//! ## Overview
//!
//! The router is responsible for:
//! - Parsing route patterns (`/users/:id`, `/static/*rest`)
//! - Building a radix tree keyed on pattern bytes
//! - Matching an incoming method and path to exactly one registered value
//! - Extracting named, percent-decoded path parameters
//! - Dumping the tree for debugging (`print_routes`)
//!
//! ## Precedence
//!
//! At every node a static edge beats the parameter edge, which beats the wildcard
//! edge. `/user/admin` and `/user/:id` can therefore coexist: the literal always
//! wins for `/user/admin`, the parameter route serves everything else.
//!
//! ## Example
//!
//! ```rust
//! use brrtframe::config::RouterConfig;
//! use brrtframe::router::Router;
//! use http::Method;
//! use std::sync::Arc;
//!
//! let mut router = Router::new(RouterConfig::default());
//! router.register(Method::GET, "/users/:id", Arc::new("get_user")).unwrap();
//!
//! let m = router.find(&Method::GET, "/users/42").unwrap();
//! assert_eq!(*m.value, "get_user");
//! assert_eq!(m.param("id"), Some("42"));
//! ```
//!
//! ## Performance
//!
//! Lookup cost is proportional to the path length, not to the number of routes.
//! Registration is only allowed before the framework starts serving, so the tree
//! is read-only on the request path.

mod core;
mod pattern;
mod radix;

pub use core::{ParamVec, RouteMatch, Router, MAX_INLINE_PARAMS, SUPPORTED_METHODS};
pub use pattern::{Pattern, Token};
pub use radix::{RadixTree, RouteEntry};
