//! Default schema compiler backed by the `jsonschema` crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use serde_json::Value;

use super::{SchemaCompiler, SchemaDefinition};
use crate::validator::{ValidationIssue, Validator};

/// References nested deeper than this are left unresolved.
const MAX_REF_DEPTH: usize = 32;

/// Compiles JSON Schema documents with `jsonschema`.
///
/// `$ref` values naming a shared schema (`"user"` or `"user#"`) are inlined before
/// compilation so shared schemas work without a remote resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaCompiler;

impl SchemaCompiler for JsonSchemaCompiler {
    fn compile(&self, definition: &SchemaDefinition<'_>) -> anyhow::Result<Arc<dyn Validator>> {
        let schema = inline_refs(definition.schema, definition.shared, 0);
        let compiled = jsonschema::validator_for(&schema).map_err(|e| anyhow!("{e}"))?;
        Ok(Arc::new(JsonSchemaValidator { compiled }))
    }
}

struct JsonSchemaValidator {
    compiled: jsonschema::Validator,
}

impl Validator for JsonSchemaValidator {
    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        let issues: Vec<ValidationIssue> = self
            .compiled
            .iter_errors(value)
            .map(|e| {
                ValidationIssue::new(
                    e.instance_path().as_str(),
                    e.kind().keyword(),
                    e.to_string(),
                )
            })
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn inline_refs(schema: &Value, shared: &BTreeMap<String, Value>, depth: usize) -> Value {
    match schema {
        Value::Object(map) => {
            if depth < MAX_REF_DEPTH {
                if let Some(target) = map
                    .get("$ref")
                    .and_then(Value::as_str)
                    .and_then(|r| shared.get(r.trim_end_matches('#')))
                {
                    let mut resolved = inline_refs(target, shared, depth + 1);
                    // jsonschema would try to resolve the id as a remote document.
                    if let Value::Object(obj) = &mut resolved {
                        obj.remove("$id");
                    }
                    return resolved;
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), inline_refs(v, shared, depth)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| inline_refs(v, shared, depth))
                .collect(),
        ),
        other => other.clone(),
    }
}
