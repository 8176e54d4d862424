//! Radix tree implementation for efficient HTTP route matching
//!
//! The tree is a compressed trie over the bytes of route patterns. Nodes live in an
//! arena (`Vec<RadixNode>`) and refer to their children by index, so the structure
//! is acyclic and printing is a plain top-down walk.
//!
//! ## Node layout
//!
//! Every node has up to three kinds of outgoing edges:
//!
//! - **Static** children keyed by the first character of their prefix. Prefixes of
//!   siblings never overlap: inserting a path that shares part of an existing
//!   child's prefix splits that child (classic radix compaction).
//! - At most one **parameter** child, which consumes one path segment (up to the
//!   next `/`, never empty).
//! - At most one **wildcard** child, which consumes the rest of the path.
//!
//! Parameter and wildcard nodes are anonymous: the names bound by a route are kept
//! on the route entry, so `/users/:id` and `/users/:userId/posts` share the same
//! parameter node.
//!
//! ## Matching precedence
//!
//! At each node the search tries, in order: the static edge, the parameter edge,
//! the wildcard edge. A branch that dead-ends backtracks into the next option, so a
//! literal route always wins over a parameter route at the same position while the
//! parameter route still serves every other value.

use http::Method;
use smallvec::SmallVec;
use std::fmt::Write as _;
use std::sync::Arc;

use super::pattern::{Pattern, Token};
use crate::error::{FrameworkError, Result};

type NodeId = usize;

const ROOT: NodeId = 0;

/// Maximum number of captured values kept inline during a lookup.
pub const MAX_INLINE_CAPTURES: usize = 8;

/// Raw captured values in pattern order.
pub type CaptureVec<'p> = SmallVec<[&'p str; MAX_INLINE_CAPTURES]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Static,
    Param,
    Wildcard,
}

/// A route stored at a terminal node.
#[derive(Debug)]
pub struct RouteEntry<T> {
    pub method: Method,
    /// Pattern as registered, for logs and errors.
    pub pattern: String,
    /// Names of the captures, in pattern order.
    pub param_names: Arc<[Arc<str>]>,
    pub value: Arc<T>,
}

impl<T> Clone for RouteEntry<T> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            pattern: self.pattern.clone(),
            param_names: Arc::clone(&self.param_names),
            value: Arc::clone(&self.value),
        }
    }
}

#[derive(Debug)]
struct RadixNode<T> {
    kind: NodeKind,
    /// Literal bytes consumed by a static node; empty for param/wildcard nodes.
    prefix: String,
    /// Static children, sorted by first character.
    static_children: Vec<(char, NodeId)>,
    param_child: Option<NodeId>,
    wildcard_child: Option<NodeId>,
    /// Routes terminating here, in registration order.
    routes: Vec<RouteEntry<T>>,
}

impl<T> RadixNode<T> {
    fn new(kind: NodeKind, prefix: String) -> Self {
        Self {
            kind,
            prefix,
            static_children: Vec::new(),
            param_child: None,
            wildcard_child: None,
            routes: Vec::new(),
        }
    }

    fn static_child(&self, first: char) -> Option<NodeId> {
        self.static_children
            .binary_search_by_key(&first, |(c, _)| *c)
            .ok()
            .map(|i| self.static_children[i].1)
    }

    fn set_static_child(&mut self, first: char, id: NodeId) {
        match self
            .static_children
            .binary_search_by_key(&first, |(c, _)| *c)
        {
            Ok(i) => self.static_children[i].1 = id,
            Err(i) => self.static_children.insert(i, (first, id)),
        }
    }

    fn route(&self, method: &Method) -> Option<&RouteEntry<T>> {
        self.routes.iter().find(|r| &r.method == method)
    }
}

/// Radix tree mapping (method, path) to a value of type `T`.
#[derive(Debug)]
pub struct RadixTree<T> {
    nodes: Vec<RadixNode<T>>,
    len: usize,
}

impl<T> Default for RadixTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RadixTree<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![RadixNode::new(NodeKind::Static, String::new())],
            len: 0,
        }
    }

    /// Number of (method, pattern) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, node: RadixNode<T>) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Insert a parsed pattern. Fails if the terminal node already serves `method`.
    pub fn insert(
        &mut self,
        method: Method,
        raw_pattern: &str,
        pattern: &Pattern,
        value: Arc<T>,
    ) -> Result<()> {
        let mut node = ROOT;
        for token in &pattern.tokens {
            node = match token {
                Token::Static(text) => self.insert_static(node, text),
                Token::Param(_) => match self.nodes[node].param_child {
                    Some(id) => id,
                    None => {
                        let id = self.push(RadixNode::new(NodeKind::Param, String::new()));
                        self.nodes[node].param_child = Some(id);
                        id
                    }
                },
                Token::Wildcard(_) => match self.nodes[node].wildcard_child {
                    Some(id) => id,
                    None => {
                        let id = self.push(RadixNode::new(NodeKind::Wildcard, String::new()));
                        self.nodes[node].wildcard_child = Some(id);
                        id
                    }
                },
            };
        }

        let terminal = &mut self.nodes[node];
        if terminal.route(&method).is_some() {
            return Err(FrameworkError::DuplicateRoute {
                method: method.to_string(),
                path: raw_pattern.to_string(),
            });
        }
        let param_names: Vec<Arc<str>> = pattern
            .param_names()
            .into_iter()
            .map(Arc::from)
            .collect();
        terminal.routes.push(RouteEntry {
            method,
            pattern: raw_pattern.to_string(),
            param_names: param_names.into(),
            value,
        });
        self.len += 1;
        Ok(())
    }

    /// Walk/extend static edges from `node` so that `text` is consumed; returns the
    /// node where `text` ends.
    fn insert_static(&mut self, mut node: NodeId, mut text: &str) -> NodeId {
        // Children are keyed by whole characters, so a found child always shares at
        // least one character with `text` and every step consumes input.
        while let Some(first) = text.chars().next() {
            let Some(child) = self.nodes[node].static_child(first) else {
                let id = self.push(RadixNode::new(NodeKind::Static, text.to_string()));
                self.nodes[node].set_static_child(first, id);
                return id;
            };

            let common = common_prefix_len(&self.nodes[child].prefix, text);
            let tail_first = self.nodes[child]
                .prefix
                .get(common..)
                .and_then(|tail| tail.chars().next());
            if let Some(tail_first) = tail_first {
                // Split: `child` keeps the tail, a new node takes the shared head.
                let tail = self.nodes[child].prefix.split_off(common);
                let head = std::mem::replace(&mut self.nodes[child].prefix, tail);

                let mut mid = RadixNode::new(NodeKind::Static, head);
                mid.static_children.push((tail_first, child));
                let mid = self.push(mid);
                self.nodes[node].set_static_child(first, mid);
                node = mid;
            } else {
                node = child;
            }
            text = &text[common..];
        }
        node
    }

    /// Find the entry for `method` matching `path`, with captured values in pattern
    /// order.
    #[must_use]
    pub fn find<'p>(
        &self,
        method: &Method,
        path: &'p str,
    ) -> Option<(&RouteEntry<T>, CaptureVec<'p>)> {
        let mut captures = CaptureVec::new();
        let entry = self.search(ROOT, path, method, &mut captures)?;
        Some((entry, captures))
    }

    fn search<'p>(
        &self,
        id: NodeId,
        path: &'p str,
        method: &Method,
        captures: &mut CaptureVec<'p>,
    ) -> Option<&RouteEntry<T>> {
        let node = &self.nodes[id];

        if path.is_empty() {
            if let Some(entry) = node.route(method) {
                return Some(entry);
            }
            // A wildcard also matches an empty remainder.
            let wildcard = node.wildcard_child?;
            let entry = self.nodes[wildcard].route(method)?;
            captures.push(path);
            return Some(entry);
        }

        if let Some(child) = path.chars().next().and_then(|c| node.static_child(c)) {
            let prefix = &self.nodes[child].prefix;
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                if let Some(entry) = self.search(child, rest, method, captures) {
                    return Some(entry);
                }
            }
        }

        if let Some(param) = node.param_child {
            let end = path.find('/').unwrap_or(path.len());
            if end > 0 {
                captures.push(&path[..end]);
                if let Some(entry) = self.search(param, &path[end..], method, captures) {
                    return Some(entry);
                }
                captures.pop();
            }
        }

        if let Some(wildcard) = node.wildcard_child {
            if let Some(entry) = self.nodes[wildcard].route(method) {
                captures.push(path);
                return Some(entry);
            }
        }

        None
    }

    /// Every stored entry, in tree order.
    #[must_use]
    pub fn entries(&self) -> Vec<&RouteEntry<T>> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            out.extend(node.routes.iter());
            // Reverse push so static children come out first, then param, then wildcard.
            stack.extend(node.wildcard_child);
            stack.extend(node.param_child);
            stack.extend(node.static_children.iter().rev().map(|(_, c)| *c));
        }
        out
    }

    /// Human-readable dump of the exact tree used for matching.
    ///
    /// Children are listed in match precedence order (static by character, then `:`,
    /// then `*`); terminal nodes list their methods in registration order.
    #[must_use]
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        let root = &self.nodes[ROOT];
        let children = self.children_of(ROOT);
        if !root.routes.is_empty() {
            let _ = writeln!(out, "(root){}", methods_suffix(&root.routes));
        }
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            self.print_node(child, "", i + 1 == count, &mut out);
        }
        out
    }

    fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[id];
        node.static_children
            .iter()
            .map(|(_, c)| *c)
            .chain(node.param_child)
            .chain(node.wildcard_child)
            .collect()
    }

    fn print_node(&self, id: NodeId, indent: &str, last: bool, out: &mut String) {
        let node = &self.nodes[id];
        let label = match node.kind {
            NodeKind::Static => node.prefix.as_str(),
            NodeKind::Param => ":",
            NodeKind::Wildcard => "*",
        };
        let branch = if last { "└── " } else { "├── " };
        let _ = writeln!(out, "{indent}{branch}{label}{}", methods_suffix(&node.routes));

        let child_indent = format!("{indent}{}", if last { "    " } else { "│   " });
        let children = self.children_of(id);
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            self.print_node(child, &child_indent, i + 1 == count, out);
        }
    }
}

fn methods_suffix<T>(routes: &[RouteEntry<T>]) -> String {
    if routes.is_empty() {
        return String::new();
    }
    let methods: Vec<&str> = routes.iter().map(|r| r.method.as_str()).collect();
    format!(" ({})", methods.join(", "))
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    let len = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    // Never split inside a UTF-8 sequence.
    (0..=len).rev().find(|&i| a.is_char_boundary(i)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(routes: &[(Method, &str)]) -> RadixTree<String> {
        let mut tree = RadixTree::new();
        for (method, path) in routes {
            let pattern = Pattern::parse(path, true).unwrap();
            tree.insert(
                method.clone(),
                path,
                &pattern,
                Arc::new(format!("{method} {path}")),
            )
            .unwrap();
        }
        tree
    }

    fn hit(tree: &RadixTree<String>, method: Method, path: &str) -> Option<(String, Vec<String>)> {
        tree.find(&method, path).map(|(e, caps)| {
            (
                e.value.as_ref().clone(),
                caps.iter().map(|c| (*c).to_string()).collect(),
            )
        })
    }

    #[test]
    fn test_static_and_param_coexist() {
        let t = tree(&[(Method::GET, "/user/admin"), (Method::GET, "/user/:id")]);
        assert_eq!(
            hit(&t, Method::GET, "/user/admin").unwrap().0,
            "GET /user/admin"
        );
        let (value, caps) = hit(&t, Method::GET, "/user/42").unwrap();
        assert_eq!(value, "GET /user/:id");
        assert_eq!(caps, vec!["42"]);
        // Shares a prefix with "admin" but is not the literal.
        assert_eq!(hit(&t, Method::GET, "/user/adm").unwrap().1, vec!["adm"]);
        assert_eq!(hit(&t, Method::GET, "/user/admins").unwrap().1, vec!["admins"]);
    }

    #[test]
    fn test_backtracks_from_static_to_param() {
        let t = tree(&[
            (Method::GET, "/a/b/c"),
            (Method::GET, "/a/:x/d"),
        ]);
        let (value, caps) = hit(&t, Method::GET, "/a/b/d").unwrap();
        assert_eq!(value, "GET /a/:x/d");
        assert_eq!(caps, vec!["b"]);
    }

    #[test]
    fn test_backtracks_on_method_mismatch() {
        let t = tree(&[(Method::POST, "/a/b"), (Method::GET, "/a/:x")]);
        assert_eq!(hit(&t, Method::GET, "/a/b").unwrap().0, "GET /a/:x");
        assert_eq!(hit(&t, Method::POST, "/a/b").unwrap().0, "POST /a/b");
    }

    #[test]
    fn test_wildcard_takes_the_rest() {
        let t = tree(&[(Method::GET, "/static/*rest")]);
        assert_eq!(
            hit(&t, Method::GET, "/static/img/a.png").unwrap().1,
            vec!["img/a.png"]
        );
        assert_eq!(hit(&t, Method::GET, "/static/").unwrap().1, vec![""]);
        assert!(hit(&t, Method::GET, "/static").is_none());
    }

    #[test]
    fn test_param_beats_wildcard() {
        let t = tree(&[(Method::GET, "/f/:name"), (Method::GET, "/f/*rest")]);
        assert_eq!(hit(&t, Method::GET, "/f/one").unwrap().0, "GET /f/:name");
        assert_eq!(hit(&t, Method::GET, "/f/one/two").unwrap().0, "GET /f/*rest");
    }

    #[test]
    fn test_empty_segment_does_not_bind_param() {
        let t = tree(&[(Method::GET, "/users/:id")]);
        assert!(hit(&t, Method::GET, "/users/").is_none());
        assert!(hit(&t, Method::GET, "/users").is_none());
    }

    #[test]
    fn test_duplicate_is_rejected_even_with_different_param_names() {
        let mut t = tree(&[(Method::GET, "/users/:id")]);
        let pattern = Pattern::parse("/users/:userId", true).unwrap();
        let err = t
            .insert(Method::GET, "/users/:userId", &pattern, Arc::new(String::new()))
            .unwrap_err();
        assert!(matches!(err, FrameworkError::DuplicateRoute { .. }));
        // Another method at the same node is fine.
        t.insert(Method::PUT, "/users/:userId", &pattern, Arc::new(String::new()))
            .unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_split_keeps_existing_routes() {
        let t = tree(&[
            (Method::GET, "/search"),
            (Method::GET, "/support"),
            (Method::GET, "/s"),
        ]);
        assert_eq!(hit(&t, Method::GET, "/search").unwrap().0, "GET /search");
        assert_eq!(hit(&t, Method::GET, "/support").unwrap().0, "GET /support");
        assert_eq!(hit(&t, Method::GET, "/s").unwrap().0, "GET /s");
        assert!(hit(&t, Method::GET, "/su").is_none());
    }

    #[test]
    fn test_pretty_print_reflects_structure() {
        let t = tree(&[
            (Method::GET, "/user/admin"),
            (Method::GET, "/user/:id"),
            (Method::POST, "/user/:id"),
            (Method::GET, "/static/*rest"),
        ]);
        let expected = "\
└── /
    ├── static/
    │   └── * (GET)
    └── user/
        ├── admin (GET)
        └── : (GET, POST)
";
        assert_eq!(t.pretty_print(), expected);
    }

    #[test]
    fn test_entries_lists_everything() {
        let t = tree(&[
            (Method::GET, "/a"),
            (Method::GET, "/a/:b"),
            (Method::DELETE, "/z/*"),
        ]);
        let patterns: Vec<&str> = t.entries().iter().map(|e| e.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["/a", "/a/:b", "/z/*"]);
    }

    #[test]
    fn test_multibyte_siblings_sharing_a_lead_byte() {
        // 'é' and 'ê' both start with 0xC3.
        let t = tree(&[
            (Method::GET, "/café"),
            (Method::GET, "/cafê"),
            (Method::GET, "/é"),
            (Method::GET, "/ê/:x"),
        ]);
        assert_eq!(hit(&t, Method::GET, "/café").unwrap().0, "GET /café");
        assert_eq!(hit(&t, Method::GET, "/cafê").unwrap().0, "GET /cafê");
        assert_eq!(hit(&t, Method::GET, "/é").unwrap().0, "GET /é");
        assert_eq!(hit(&t, Method::GET, "/ê/1").unwrap().1, vec!["1"]);
        assert!(hit(&t, Method::GET, "/caf").is_none());
        assert!(hit(&t, Method::GET, "/cafè").is_none());
        assert_eq!(t.len(), 4);
    }
}
