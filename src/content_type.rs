//! Content-type parsers.
//!
//! Each context owns the parsers it declared. A request body is materialized by
//! the nearest visible parser for its normalized media type, falling back to the
//! reserved `*` entry; with neither, the request fails with 415.
//!
//! The root context starts with `application/json` and `text/plain`. Those two may
//! be replaced once by a user parser anywhere in the tree; any other media type
//! already visible at a context cannot be declared again below it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::error::{FrameworkError, Result};
use crate::request::Request;

/// Reserved media type used when nothing more specific matches.
pub const WILDCARD: &str = "*";

/// Turns a raw body into the request's JSON body value.
pub type ContentTypeParser =
    Arc<dyn Fn(Request, Bytes) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap an async closure as a [`ContentTypeParser`].
pub fn parser<F, Fut>(f: F) -> ContentTypeParser
where
    F: Fn(Request, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |request: Request, body: Bytes| f(request, body).boxed())
}

/// Lower-cased media type with parameters (`; charset=...`) removed.
#[must_use]
pub fn normalize_media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[derive(Clone)]
struct ParserEntry {
    parser: ContentTypeParser,
    builtin: bool,
}

/// Parsers declared by one context.
#[derive(Clone, Default)]
pub struct ContentTypeParsers {
    entries: BTreeMap<String, ParserEntry>,
}

impl std::fmt::Debug for ContentTypeParsers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl ContentTypeParsers {
    /// The root set: JSON and plain text.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "application/json".to_string(),
            ParserEntry {
                parser: parser(|_req, body| async move { parse_json(&body) }),
                builtin: true,
            },
        );
        entries.insert(
            "text/plain".to_string(),
            ParserEntry {
                parser: parser(|_req, body| async move { parse_text(&body) }),
                builtin: true,
            },
        );
        Self { entries }
    }

    #[must_use]
    pub fn contains(&self, media_type: &str) -> bool {
        self.entries.contains_key(&normalize_media_type(media_type))
    }

    /// Add a parser after checking it against what is visible.
    ///
    /// `ancestors` are the sets of the enclosing contexts, nearest first.
    pub fn declare(
        &mut self,
        ancestors: &[&ContentTypeParsers],
        media_type: &str,
        parser: ContentTypeParser,
    ) -> Result<()> {
        let key = normalize_media_type(media_type);
        let nearest = std::iter::once(&*self)
            .chain(ancestors.iter().copied())
            .find_map(|set| set.entries.get(&key));
        if matches!(nearest, Some(entry) if !entry.builtin) {
            return Err(FrameworkError::DuplicateContentTypeParser(key));
        }
        self.entries.insert(
            key,
            ParserEntry {
                parser,
                builtin: false,
            },
        );
        Ok(())
    }
}

/// Flattened parsers visible at one context.
#[derive(Clone, Default)]
pub struct ParserTable {
    parsers: BTreeMap<String, ContentTypeParser>,
}

impl ParserTable {
    /// Merge sets ordered root first; nearer declarations win.
    pub fn resolve<'a>(chain: impl IntoIterator<Item = &'a ContentTypeParsers>) -> Self {
        let mut parsers = BTreeMap::new();
        for set in chain {
            parsers.extend(
                set.entries
                    .iter()
                    .map(|(k, e)| (k.clone(), Arc::clone(&e.parser))),
            );
        }
        Self { parsers }
    }

    /// This table with route-level parsers laid over it.
    #[must_use]
    pub fn with_overrides(&self, overrides: &BTreeMap<String, ContentTypeParser>) -> Self {
        let mut parsers = self.parsers.clone();
        parsers.extend(overrides.iter().map(|(k, p)| (k.clone(), Arc::clone(p))));
        Self { parsers }
    }

    /// Exact media-type match, else the `*` fallback.
    #[must_use]
    pub fn lookup(&self, content_type: &str) -> Option<&ContentTypeParser> {
        self.parsers
            .get(&normalize_media_type(content_type))
            .or_else(|| self.parsers.get(WILDCARD))
    }

    pub fn media_types(&self) -> impl Iterator<Item = &str> {
        self.parsers.keys().map(String::as_str)
    }
}

fn parse_json(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body)
        .map_err(|e| FrameworkError::BadRequest(format!("Body is not valid JSON: {e}")))
}

fn parse_text(body: &[u8]) -> Result<Value> {
    std::str::from_utf8(body)
        .map(|s| Value::String(s.to_string()))
        .map_err(|e| FrameworkError::BadRequest(format!("Body is not valid UTF-8: {e}")))
}
