//! # Schema Registry
//!
//! Routes may carry schemas for their `body`, `querystring`, `params`, `headers`
//! and `response` (keyed by exact status, `NXX` class or `default`). The core never
//! interprets a schema itself: a [`SchemaCompiler`] turns each part into an opaque
//! [`Validator`] while the context tree is finalized, and the request pipeline only
//! calls the compiled validators.
//!
//! Shared schemas (`add_schema`) carry a string `$id`, are visible to the declaring
//! context and its descendants, and are handed to the compiler so route schemas can
//! reference them with `"$ref": "<id>"`.
//!
//! Path parameters, query strings and headers arrive as strings. Before validation
//! they are coerced to the JSON types named by the schema's `properties.*.type`.

mod compiler;

pub use compiler::JsonSchemaCompiler;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FrameworkError, Result};
use crate::router::ParamVec;
use crate::validator::Validator;

/// Schemas attached to a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSchema {
    pub body: Option<Value>,
    pub querystring: Option<Value>,
    pub params: Option<Value>,
    pub headers: Option<Value>,
    /// Keyed by `"200"`, `"2XX"` or `"default"`.
    pub response: BTreeMap<String, Value>,
}

impl RouteSchema {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_none()
            && self.querystring.is_none()
            && self.params.is_none()
            && self.headers.is_none()
            && self.response.is_empty()
    }
}

/// The part of a route a schema applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaPart {
    Body,
    Querystring,
    Params,
    Headers,
    Response(String),
}

impl fmt::Display for SchemaPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaPart::Body => f.write_str("body"),
            SchemaPart::Querystring => f.write_str("querystring"),
            SchemaPart::Params => f.write_str("params"),
            SchemaPart::Headers => f.write_str("headers"),
            SchemaPart::Response(key) => write!(f, "response {key}"),
        }
    }
}

/// Everything a compiler gets to see for one schema.
#[derive(Debug, Clone, Copy)]
pub struct SchemaDefinition<'a> {
    pub schema: &'a Value,
    pub part: &'a SchemaPart,
    pub method: &'a Method,
    pub url: &'a str,
    /// Shared schemas visible at the route's context, by `$id`.
    pub shared: &'a BTreeMap<String, Value>,
}

/// Turns a schema description into a validator.
pub trait SchemaCompiler: Send + Sync {
    /// # Errors
    ///
    /// Any error rejects the route; `ready()` fails with `SchemaCompilation`.
    fn compile(&self, definition: &SchemaDefinition<'_>) -> anyhow::Result<Arc<dyn Validator>>;
}

impl<F> SchemaCompiler for F
where
    F: Fn(&SchemaDefinition<'_>) -> anyhow::Result<Arc<dyn Validator>> + Send + Sync,
{
    fn compile(&self, definition: &SchemaDefinition<'_>) -> anyhow::Result<Arc<dyn Validator>> {
        self(definition)
    }
}

/// Shared schemas declared by one context.
#[derive(Debug, Clone, Default)]
pub struct SharedSchemas {
    schemas: BTreeMap<String, Value>,
}

impl SharedSchemas {
    /// Add `schema` after checking its `$id` against everything visible.
    pub fn declare(&mut self, ancestors: &[&SharedSchemas], schema: Value) -> Result<()> {
        let id = schema
            .get("$id")
            .and_then(Value::as_str)
            .ok_or(FrameworkError::MissingSchemaId)?
            .to_string();
        if self.schemas.contains_key(&id) || ancestors.iter().any(|s| s.schemas.contains_key(&id))
        {
            return Err(FrameworkError::DuplicateSchema(id));
        }
        self.schemas.insert(id, schema);
        Ok(())
    }

    /// Merge sets ordered root first.
    pub fn resolve<'a>(chain: impl IntoIterator<Item = &'a SharedSchemas>) -> BTreeMap<String, Value> {
        let mut merged = BTreeMap::new();
        for set in chain {
            merged.extend(set.schemas.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }
}

struct CompiledPart {
    validator: Arc<dyn Validator>,
    /// Schema with top-level `$ref` resolved, used to guide string coercion.
    resolved: Value,
}

/// Validators compiled for one route.
#[derive(Default)]
pub struct CompiledSchemas {
    body: Option<CompiledPart>,
    querystring: Option<CompiledPart>,
    params: Option<CompiledPart>,
    headers: Option<CompiledPart>,
    response: Vec<(String, Arc<dyn Validator>)>,
}

impl fmt::Debug for CompiledSchemas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchemas")
            .field("body", &self.body.is_some())
            .field("querystring", &self.querystring.is_some())
            .field("params", &self.params.is_some())
            .field("headers", &self.headers.is_some())
            .field(
                "response",
                &self.response.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CompiledSchemas {
    /// Compile every part of `schema` for one (method, url).
    pub fn compile(
        compiler: &dyn SchemaCompiler,
        schema: &RouteSchema,
        method: &Method,
        url: &str,
        shared: &BTreeMap<String, Value>,
    ) -> Result<Self> {
        let compile_one = |value: &Value, part: SchemaPart| -> Result<Arc<dyn Validator>> {
            let definition = SchemaDefinition {
                schema: value,
                part: &part,
                method,
                url,
                shared,
            };
            compiler
                .compile(&definition)
                .map_err(|e| FrameworkError::SchemaCompilation {
                    route: format!("{method} {url}"),
                    part: part.to_string(),
                    message: format!("{e:#}"),
                })
        };
        let compile_part = |value: &Option<Value>, part: SchemaPart| -> Result<Option<CompiledPart>> {
            value
                .as_ref()
                .map(|v| -> Result<CompiledPart> {
                    Ok(CompiledPart {
                        validator: compile_one(v, part)?,
                        resolved: resolve_top_ref(v, shared).clone(),
                    })
                })
                .transpose()
        };

        let mut response = Vec::with_capacity(schema.response.len());
        for (key, value) in &schema.response {
            let key = key.to_ascii_uppercase();
            let validator = compile_one(value, SchemaPart::Response(key.clone()))?;
            response.push((key, validator));
        }

        Ok(Self {
            body: compile_part(&schema.body, SchemaPart::Body)?,
            querystring: compile_part(&schema.querystring, SchemaPart::Querystring)?,
            params: compile_part(&schema.params, SchemaPart::Params)?,
            headers: compile_part(&schema.headers, SchemaPart::Headers)?,
            response,
        })
    }

    /// Validate (and coerce) path parameters.
    pub fn check_params(&self, raw: &ParamVec) -> Result<Option<Value>> {
        let Some(part) = &self.params else {
            return Ok(None);
        };
        let value = coerce_pairs(&part.resolved, raw.iter().map(|(k, v)| (k.as_ref(), v.as_str())));
        run(part, &value, "params")?;
        Ok(Some(value))
    }

    /// Validate the parsed body.
    pub fn check_body(&self, body: &Value) -> Result<()> {
        match &self.body {
            Some(part) => run(part, body, "body"),
            None => Ok(()),
        }
    }

    /// Validate (and coerce) the query string.
    pub fn check_querystring(&self, raw: &ParamVec) -> Result<Option<Value>> {
        let Some(part) = &self.querystring else {
            return Ok(None);
        };
        let value = coerce_pairs(&part.resolved, raw.iter().map(|(k, v)| (k.as_ref(), v.as_str())));
        run(part, &value, "querystring")?;
        Ok(Some(value))
    }

    /// Validate (and coerce) headers.
    pub fn check_headers<'a>(
        &self,
        raw: impl Iterator<Item = (&'a str, &'a str)>,
    ) -> Result<Option<Value>> {
        let Some(part) = &self.headers else {
            return Ok(None);
        };
        let value = coerce_pairs(&part.resolved, raw);
        run(part, &value, "headers")?;
        Ok(Some(value))
    }

    /// Check an outgoing payload against the schema for `status`, if any.
    pub fn check_response(&self, status: StatusCode, payload: &Value) -> Result<()> {
        let Some(validator) = self.response_validator(status) else {
            return Ok(());
        };
        validator.validate(payload).map_err(|issues| {
            let detail = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            FrameworkError::Serialization(format!(
                "response does not match schema for status {}: {detail}",
                status.as_u16()
            ))
        })
    }

    fn response_validator(&self, status: StatusCode) -> Option<&Arc<dyn Validator>> {
        let exact = status.as_u16().to_string();
        let class = format!("{}XX", status.as_u16() / 100);
        for key in [exact.as_str(), class.as_str(), "DEFAULT"] {
            if let Some((_, validator)) = self.response.iter().find(|(k, _)| k == key) {
                return Some(validator);
            }
        }
        None
    }
}

fn run(part: &CompiledPart, value: &Value, name: &str) -> Result<()> {
    part.validator
        .validate(value)
        .map_err(|issues| FrameworkError::Validation {
            part: name.to_string(),
            issues,
        })
}

/// Follow a top-level `$ref` into the shared schemas.
pub(crate) fn resolve_top_ref<'a>(schema: &'a Value, shared: &'a BTreeMap<String, Value>) -> &'a Value {
    schema
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| shared.get(r.trim_end_matches('#')))
        .unwrap_or(schema)
}

/// Build an object from string pairs, coercing each value to the declared type.
///
/// Repeated keys become arrays.
fn coerce_pairs<'a>(schema: &Value, pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Value {
    let properties = schema.get("properties").and_then(Value::as_object);
    let mut out = Map::new();
    for (key, raw) in pairs {
        let key = key.to_string();
        let declared = properties.and_then(|p| p.get(&key));
        let coerced = coerce_value(declared, raw);
        match out.get_mut(&key) {
            Some(Value::Array(items)) if is_array_type(declared) => items.extend(as_items(coerced)),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, coerced]);
            }
            None => {
                out.insert(key, coerced);
            }
        }
    }
    Value::Object(out)
}

fn as_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn declared_type(schema: Option<&Value>) -> Option<&str> {
    match schema?.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    }
}

fn is_array_type(schema: Option<&Value>) -> bool {
    declared_type(schema) == Some("array")
}

fn coerce_value(schema: Option<&Value>, raw: &str) -> Value {
    match declared_type(schema) {
        Some("integer") => raw
            .parse::<i64>()
            .map_or_else(|_| Value::String(raw.to_string()), Value::from),
        Some("number") => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or_else(|| Value::String(raw.to_string()), Value::Number),
        Some("boolean") => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        Some("array") => {
            let items = schema.and_then(|s| s.get("items"));
            Value::Array(vec![coerce_value(items, raw)])
        }
        _ => Value::String(raw.to_string()),
    }
}
