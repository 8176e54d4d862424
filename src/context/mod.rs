//! # Encapsulation Context Tree
//!
//! Every plugin registration creates exactly one child context. Contexts live in an
//! arena ([`Registry`]) and refer to their parent and children by index, so the
//! tree has no reference cycles and never needs back-pointers.
//!
//! Each node stores only what its own context declared: decorators, hooks, shared
//! schemas, content-type parsers, handlers and pending routes. Inheritance is
//! resolved by walking parent indices. While the tree is open, registration checks
//! (duplicate decorators, missing dependencies, duplicate parsers or schema ids)
//! see exactly what is visible at call time. At `ready()` the arena is frozen and
//! one read-only [`ContextView`] per node is built from the final tree, so anything
//! an ancestor added before `ready()` is visible to its whole subtree.
//!
//! ## Lifecycle
//!
//! ```text
//! Registering ──ready()──► Loading ──► Ready
//!                             │
//!                             └──────► Failed
//! (any) ──close()──► Closed
//! ```

mod loader;
mod view;

pub(crate) use loader::load;
pub use view::ContextView;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content_type::{ContentTypeParser, ContentTypeParsers};
use crate::decorator::{DecoratorSet, DecoratorTarget, DecoratorValue};
use crate::error::{FrameworkError, Result};
use crate::hooks::HookLists;
use crate::instance::Instance;
use crate::lifecycle::ErrorHandler;
use crate::route::{normalize_prefix, Handler, RouteOptions};
use crate::schema::{SchemaCompiler, SharedSchemas};

/// Index of a context in the arena; the root is `0`.
pub type ContextId = usize;

pub(crate) const ROOT: ContextId = 0;

/// Registration work of a plugin; awaited during `ready()`.
pub type PluginFn =
    Box<dyn FnOnce(Instance, PluginOptions) -> BoxFuture<'static, Result<()>> + Send>;

/// Options passed to `register` and on to the plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginOptions {
    /// Used in logs and errors; defaults to `plugin-<n>`.
    pub name: Option<String>,
    /// Appended to the parent's prefix for every route in the plugin's subtree.
    pub prefix: String,
    /// Free-form plugin configuration.
    pub options: Value,
}

impl PluginOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// Where the tree is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Registering,
    Loading,
    Ready,
    Failed,
    Closed,
}

pub(crate) struct ContextNode {
    pub parent: Option<ContextId>,
    pub children: Vec<ContextId>,
    pub name: String,
    pub prefix: String,
    pub decorators: DecoratorSet,
    pub hooks: HookLists,
    pub schemas: SharedSchemas,
    pub compiler: Option<Arc<dyn SchemaCompiler>>,
    pub parsers: ContentTypeParsers,
    pub error_handler: Option<ErrorHandler>,
    pub not_found: Option<Handler>,
    pub routes: Vec<RouteOptions>,
    pub plugin: Option<(PluginFn, PluginOptions)>,
}

impl ContextNode {
    fn new(parent: Option<ContextId>, name: String, prefix: String) -> Self {
        Self {
            parent,
            children: Vec::new(),
            name,
            prefix,
            decorators: DecoratorSet::default(),
            hooks: HookLists::default(),
            schemas: SharedSchemas::default(),
            compiler: None,
            parsers: ContentTypeParsers::default(),
            error_handler: None,
            not_found: None,
            routes: Vec::new(),
            plugin: None,
        }
    }
}

/// The arena of contexts plus the tree's lifecycle state.
pub(crate) struct Registry {
    pub nodes: Vec<ContextNode>,
    pub state: LifecycleState,
}

impl Registry {
    pub fn new() -> Self {
        let mut root = ContextNode::new(None, "root".to_string(), String::new());
        root.parsers = ContentTypeParsers::with_defaults();
        Self {
            nodes: vec![root],
            state: LifecycleState::Registering,
        }
    }

    pub fn node(&self, id: ContextId) -> &ContextNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: ContextId) -> &mut ContextNode {
        &mut self.nodes[id]
    }

    /// Fail unless registration is still allowed.
    pub fn ensure_open(&self, operation: &'static str) -> Result<()> {
        match self.state {
            LifecycleState::Registering | LifecycleState::Loading => Ok(()),
            LifecycleState::Closed => Err(FrameworkError::Closed),
            LifecycleState::Ready | LifecycleState::Failed => {
                Err(FrameworkError::AlreadyStarted { operation })
            }
        }
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: ContextId) -> impl Iterator<Item = ContextId> + '_ {
        std::iter::successors(self.nodes[id].parent, move |&p| self.nodes[p].parent)
    }

    /// `id` and its ancestors, root first.
    pub fn chain(&self, id: ContextId) -> Vec<ContextId> {
        let mut chain: Vec<ContextId> = std::iter::once(id).chain(self.ancestors(id)).collect();
        chain.reverse();
        chain
    }

    /// Breadth-first order from the root; siblings in registration order.
    pub fn bfs_order(&self) -> Vec<ContextId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([ROOT]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.nodes[id].children.iter().copied());
        }
        order
    }

    pub fn add_child(
        &mut self,
        parent: ContextId,
        plugin: PluginFn,
        options: PluginOptions,
    ) -> ContextId {
        let id = self.nodes.len();
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("plugin-{id}"));
        let prefix = format!(
            "{}{}",
            self.nodes[parent].prefix,
            normalize_prefix(&options.prefix)
        );
        let mut node = ContextNode::new(Some(parent), name, prefix);
        node.plugin = Some((plugin, options));
        self.nodes.push(node);
        self.nodes[parent].children.push(id);
        id
    }

    pub fn decorate(
        &mut self,
        id: ContextId,
        target: DecoratorTarget,
        name: &str,
        value: DecoratorValue,
        dependencies: &[&str],
    ) -> Result<()> {
        let mut own = std::mem::take(&mut self.nodes[id].decorators);
        let result = {
            let ancestors: Vec<&DecoratorSet> = self
                .ancestors(id)
                .map(|a| &self.nodes[a].decorators)
                .collect();
            own.declare(&ancestors, target, name, value, dependencies)
        };
        self.nodes[id].decorators = own;
        result
    }

    pub fn has_decorator(&self, id: ContextId, target: DecoratorTarget, name: &str) -> bool {
        self.chain(id)
            .into_iter()
            .any(|c| self.nodes[c].decorators.contains(target, name))
    }

    /// Nearest visible instance decoration.
    pub fn decoration(&self, id: ContextId, name: &str) -> Option<DecoratorValue> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find_map(|c| self.nodes[c].decorators.get(DecoratorTarget::Instance, name))
            .cloned()
    }

    pub fn add_content_type_parser(
        &mut self,
        id: ContextId,
        media_type: &str,
        parser: ContentTypeParser,
    ) -> Result<()> {
        let mut own = std::mem::take(&mut self.nodes[id].parsers);
        let result = {
            let ancestors: Vec<&ContentTypeParsers> = self
                .ancestors(id)
                .map(|a| &self.nodes[a].parsers)
                .collect();
            own.declare(&ancestors, media_type, parser)
        };
        self.nodes[id].parsers = own;
        result
    }

    pub fn has_content_type_parser(&self, id: ContextId, media_type: &str) -> bool {
        self.chain(id)
            .into_iter()
            .any(|c| self.nodes[c].parsers.contains(media_type))
    }

    pub fn add_schema(&mut self, id: ContextId, schema: Value) -> Result<()> {
        let mut own = std::mem::take(&mut self.nodes[id].schemas);
        let result = {
            let ancestors: Vec<&SharedSchemas> = self
                .ancestors(id)
                .map(|a| &self.nodes[a].schemas)
                .collect();
            own.declare(&ancestors, schema)
        };
        self.nodes[id].schemas = own;
        result
    }

    pub fn schemas(&self, id: ContextId) -> BTreeMap<String, Value> {
        SharedSchemas::resolve(self.chain(id).into_iter().map(|c| &self.nodes[c].schemas))
    }
}
