//! Read-only, flattened view of one context, built when the tree is frozen.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;

use super::{ContextId, Registry};
use crate::content_type::ParserTable;
use crate::decorator::DecoratorTable;
use crate::hooks::HookLists;
use crate::lifecycle::ErrorHandler;
use crate::route::Handler;
use crate::schema::{JsonSchemaCompiler, SchemaCompiler};

static DEFAULT_COMPILER: Lazy<Arc<dyn SchemaCompiler>> =
    Lazy::new(|| Arc::new(JsonSchemaCompiler));

/// Everything visible at one context after `ready()`.
pub struct ContextView {
    pub id: ContextId,
    pub name: String,
    pub prefix: String,
    pub decorators: DecoratorTable,
    /// Ancestors' hooks first, then this context's, per point.
    pub hooks: HookLists,
    pub parsers: ParserTable,
    /// Nearest compiler set with `set_schema_compiler`, else the JSON Schema one.
    pub compiler: Arc<dyn SchemaCompiler>,
    pub shared_schemas: BTreeMap<String, Value>,
    /// Nearest error handler; `None` means the default.
    pub error_handler: Option<ErrorHandler>,
    /// This context's own not-found handler.
    pub not_found: Option<Handler>,
}

impl fmt::Debug for ContextView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextView")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("hooks", &self.hooks)
            .field("custom_error_handler", &self.error_handler.is_some())
            .field("not_found", &self.not_found.is_some())
            .finish_non_exhaustive()
    }
}

impl ContextView {
    pub(crate) fn build(registry: &Registry, id: ContextId) -> Self {
        let chain = registry.chain(id);
        let nodes = || chain.iter().map(|&c| registry.node(c));
        let nearest = || chain.iter().rev().map(|&c| registry.node(c));
        let node = registry.node(id);

        Self {
            id,
            name: node.name.clone(),
            prefix: node.prefix.clone(),
            decorators: DecoratorTable::resolve(nodes().map(|n| &n.decorators)),
            hooks: HookLists::resolve(nodes().map(|n| &n.hooks)),
            parsers: ParserTable::resolve(nodes().map(|n| &n.parsers)),
            compiler: nearest()
                .find_map(|n| n.compiler.clone())
                .unwrap_or_else(|| Arc::clone(&DEFAULT_COMPILER)),
            shared_schemas: registry.schemas(id),
            error_handler: nearest().find_map(|n| n.error_handler.clone()),
            not_found: node.not_found.clone(),
        }
    }

    /// Whether `path` falls under this context's prefix.
    #[must_use]
    pub fn covers(&self, path: &str) -> bool {
        self.prefix.is_empty()
            || path == self.prefix
            || path
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}
