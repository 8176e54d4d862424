//! # Decorator Registry
//!
//! Decorators attach named values to one of three extension points: the instance,
//! every request, or every reply. Each context owns a [`DecoratorSet`] holding only
//! what it declared; visibility is resolved by walking the context's ancestors.
//!
//! Values are tagged: plain JSON for configuration-like data, or a shared
//! `Arc<dyn Any>` for services (pools, clients). Typed access goes through a
//! downcast at the boundary so the core stays type-agnostic.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{FrameworkError, Result};

/// Extension point a decorator is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DecoratorTarget {
    Instance,
    Request,
    Reply,
}

impl fmt::Display for DecoratorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecoratorTarget::Instance => "instance",
            DecoratorTarget::Request => "request",
            DecoratorTarget::Reply => "reply",
        })
    }
}

/// Value stored under a decorator name.
#[derive(Clone)]
pub enum DecoratorValue {
    Json(Value),
    Shared(Arc<dyn Any + Send + Sync>),
}

impl DecoratorValue {
    /// Wrap an arbitrary service object.
    pub fn shared<T: Any + Send + Sync>(value: T) -> Self {
        DecoratorValue::Shared(Arc::new(value))
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            DecoratorValue::Json(v) => Some(v),
            DecoratorValue::Shared(_) => None,
        }
    }

    /// Typed view of a shared value; `None` for JSON values or a type mismatch.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            DecoratorValue::Shared(v) => Arc::clone(v).downcast::<T>().ok(),
            DecoratorValue::Json(_) => None,
        }
    }
}

impl fmt::Debug for DecoratorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoratorValue::Json(v) => f.debug_tuple("Json").field(v).finish(),
            DecoratorValue::Shared(_) => f.write_str("Shared(..)"),
        }
    }
}

impl From<Value> for DecoratorValue {
    fn from(value: Value) -> Self {
        DecoratorValue::Json(value)
    }
}

impl From<&str> for DecoratorValue {
    fn from(value: &str) -> Self {
        DecoratorValue::Json(Value::String(value.to_string()))
    }
}

/// Decorations declared by one context, per target.
#[derive(Debug, Clone, Default)]
pub struct DecoratorSet {
    instance: BTreeMap<String, DecoratorValue>,
    request: BTreeMap<String, DecoratorValue>,
    reply: BTreeMap<String, DecoratorValue>,
}

impl DecoratorSet {
    fn map(&self, target: DecoratorTarget) -> &BTreeMap<String, DecoratorValue> {
        match target {
            DecoratorTarget::Instance => &self.instance,
            DecoratorTarget::Request => &self.request,
            DecoratorTarget::Reply => &self.reply,
        }
    }

    fn map_mut(&mut self, target: DecoratorTarget) -> &mut BTreeMap<String, DecoratorValue> {
        match target {
            DecoratorTarget::Instance => &mut self.instance,
            DecoratorTarget::Request => &mut self.request,
            DecoratorTarget::Reply => &mut self.reply,
        }
    }

    #[must_use]
    pub fn contains(&self, target: DecoratorTarget, name: &str) -> bool {
        self.map(target).contains_key(name)
    }

    #[must_use]
    pub fn get(&self, target: DecoratorTarget, name: &str) -> Option<&DecoratorValue> {
        self.map(target).get(name)
    }

    pub fn iter(
        &self,
        target: DecoratorTarget,
    ) -> impl Iterator<Item = (&String, &DecoratorValue)> {
        self.map(target).iter()
    }

    /// Add a decoration to this set after checking it against everything visible.
    ///
    /// `ancestors` are the sets of the enclosing contexts, nearest first. The name
    /// must not be visible yet and every dependency must already be visible on the
    /// same target.
    pub fn declare(
        &mut self,
        ancestors: &[&DecoratorSet],
        target: DecoratorTarget,
        name: &str,
        value: DecoratorValue,
        dependencies: &[&str],
    ) -> Result<()> {
        let visible =
            |n: &str| self.contains(target, n) || ancestors.iter().any(|s| s.contains(target, n));

        if visible(name) {
            return Err(FrameworkError::DuplicateDecorator {
                target,
                name: name.to_string(),
            });
        }
        if let Some(missing) = dependencies.iter().find(|dep| !visible(**dep)) {
            return Err(FrameworkError::MissingDecoratorDependency {
                target,
                name: name.to_string(),
                dependency: (*missing).to_string(),
            });
        }

        self.map_mut(target).insert(name.to_string(), value);
        Ok(())
    }
}

/// Flattened, read-only decorations visible at one context.
#[derive(Debug, Clone, Default)]
pub struct DecoratorTable {
    pub instance: BTreeMap<String, DecoratorValue>,
    pub request: Arc<BTreeMap<String, DecoratorValue>>,
    pub reply: Arc<BTreeMap<String, DecoratorValue>>,
}

impl DecoratorTable {
    /// Merge sets ordered root first.
    pub fn resolve<'a>(chain: impl IntoIterator<Item = &'a DecoratorSet>) -> Self {
        let mut instance = BTreeMap::new();
        let mut request = BTreeMap::new();
        let mut reply = BTreeMap::new();
        for set in chain {
            instance.extend(set.instance.iter().map(|(k, v)| (k.clone(), v.clone())));
            request.extend(set.request.iter().map(|(k, v)| (k.clone(), v.clone())));
            reply.extend(set.reply.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Self {
            instance,
            request: Arc::new(request),
            reply: Arc::new(reply),
        }
    }
}

/// Per-request decorations: declared defaults plus request-local overrides.
#[derive(Debug, Clone, Default)]
pub struct Decorations {
    defaults: Arc<BTreeMap<String, DecoratorValue>>,
    overrides: BTreeMap<String, DecoratorValue>,
}

impl Decorations {
    #[must_use]
    pub fn new(defaults: Arc<BTreeMap<String, DecoratorValue>>) -> Self {
        Self {
            defaults,
            overrides: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DecoratorValue> {
        self.overrides
            .get(name)
            .or_else(|| self.defaults.get(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.overrides.contains_key(name) || self.defaults.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: DecoratorValue) {
        self.overrides.insert(name.into(), value);
    }
}
