//! Router core module - hot path for request routing.
//!
//! Wraps the [`RadixTree`] with the path normalization options the framework
//! exposes (trailing slash, case sensitivity) and turns raw captures into named,
//! percent-decoded parameters.

// JSF Rule 206: Deny heap allocations in the hot path
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::format_push_string)]
#![deny(clippy::unnecessary_to_owned)]

use http::Method;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::pattern::Pattern;
use super::radix::RadixTree;
use crate::config::RouterConfig;
use crate::error::Result;

/// Maximum number of path/query parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the hot path.
///
/// Param names use `Arc<str>` because they come from the static route tree;
/// values are per-request data from the URL.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Methods registered by the `all` shorthand.
pub const SUPPORTED_METHODS: [Method; 7] = [
    Method::DELETE,
    Method::GET,
    Method::HEAD,
    Method::PATCH,
    Method::POST,
    Method::PUT,
    Method::OPTIONS,
];

/// Result of successfully matching a request path to a route
#[derive(Debug)]
pub struct RouteMatch<T> {
    /// The value registered for the route
    pub value: Arc<T>,
    /// Pattern the route was registered with
    pub pattern: String,
    /// Captured parameters, in pattern order
    pub params: ParamVec,
}

impl<T> RouteMatch<T> {
    /// Get a path parameter by name
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Method + path router over a radix tree.
///
/// Registration happens before the framework starts serving; afterwards the
/// router is only read, so it can be shared across requests without locking.
#[derive(Debug)]
pub struct Router<T> {
    tree: RadixTree<T>,
    config: RouterConfig,
}

impl<T> Router<T> {
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            tree: RadixTree::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Register `value` under (`method`, `path`).
    ///
    /// # Errors
    ///
    /// `InvalidRoutePattern` for malformed patterns and `DuplicateRoute` when the
    /// normalized pattern is already registered for `method`.
    pub fn register(&mut self, method: Method, path: &str, value: Arc<T>) -> Result<()> {
        let normalized = self.normalize_pattern(path);
        let pattern = Pattern::parse(&normalized, self.config.case_sensitive)?;
        self.tree
            .insert(method.clone(), path, &pattern, value)
            .map_err(|err| {
                warn!(method = %method, path = %path, error = %err, "Route registration rejected");
                err
            })?;
        debug!(method = %method, path = %path, routes_count = self.tree.len(), "Route registered");
        Ok(())
    }

    /// Match an HTTP request to a route.
    ///
    /// `path` must not contain the query string.
    #[must_use]
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<T>> {
        // RT1: Route match attempt
        debug!(method = %method, path = %path, "Route match attempt");
        let match_start = Instant::now();

        let lookup = self.normalize_lookup(path);
        let found = self.tree.find(method, &lookup);
        let match_duration = match_start.elapsed();

        let Some((entry, captures)) = found else {
            // RT4: No route found
            info!(
                method = %method,
                path = %path,
                duration_us = match_duration.as_micros(),
                "No route matched"
            );
            return None;
        };

        // Lower-casing is ASCII-only, so capture offsets are valid in the original.
        let original = self.normalize_pattern(path);
        let params: ParamVec = entry
            .param_names
            .iter()
            .zip(captures.iter())
            .map(|(name, &raw)| {
                let start = raw.as_ptr() as usize - lookup.as_ptr() as usize;
                let raw = original.get(start..start + raw.len()).unwrap_or(raw);
                (Arc::clone(name), decode_param(raw))
            })
            .collect();

        // RT3: Route matched
        if match_duration > Duration::from_millis(1) {
            warn!(
                method = %method,
                path = %path,
                route_pattern = %entry.pattern,
                duration_us = match_duration.as_micros(),
                "Slow route matching detected"
            );
        } else {
            debug!(
                method = %method,
                path = %path,
                route_pattern = %entry.pattern,
                path_params = ?params,
                duration_us = match_duration.as_micros(),
                "Route matched"
            );
        }

        Some(RouteMatch {
            value: Arc::clone(&entry.value),
            pattern: entry.pattern.clone(),
            params,
        })
    }

    /// Registered (method, pattern) pairs in tree order.
    #[must_use]
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.tree
            .entries()
            .into_iter()
            .map(|e| (e.method.clone(), e.pattern.clone()))
            .collect()
    }

    /// Debug dump of the routing tree.
    #[must_use]
    pub fn print_routes(&self) -> String {
        self.tree.pretty_print()
    }

    fn normalize_pattern<'a>(&self, path: &'a str) -> &'a str {
        if self.config.ignore_trailing_slash && path.len() > 1 {
            let trimmed = path.trim_end_matches('/');
            if trimmed.is_empty() {
                "/"
            } else {
                trimmed
            }
        } else {
            path
        }
    }

    fn normalize_lookup<'a>(&self, path: &'a str) -> Cow<'a, str> {
        let path = self.normalize_pattern(path);
        if self.config.case_sensitive {
            Cow::Borrowed(path)
        } else {
            Cow::Owned(path.to_ascii_lowercase())
        }
    }
}

fn decode_param(raw: &str) -> String {
    if raw.contains('%') {
        urlencoding::decode(raw).map_or_else(|_| raw.to_owned(), Cow::into_owned)
    } else {
        raw.to_owned()
    }
}
