//! JSON-Schema sanitizer for Gemini's tool-declaration payloads.
//!
//! Gemini rejects several mainstream JSON-Schema keywords. Recursively
//! copies (never mutates the input), strips the disallowed keywords, prunes
//! properties that become empty or typeless, then filters `required` to
//! what survives.

use serde_json::Value;

const STRIPPED_KEYS: &[&str] = &["$schema", "additionalProperties", "$ref", "ref", "$defs", "definitions"];
const TYPE_CARRYING_KEYS: &[&str] = &["type", "anyOf", "oneOf", "allOf", "enum", "items", "properties"];

/// Recursively sanitize `schema` for Gemini's `functionDeclarations`
/// parameter schemas. The input is never mutated; a sanitized copy is
/// returned.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                if STRIPPED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let sanitized = sanitize_schema(value);
                if key == "properties" {
                    if let Value::Object(props) = sanitized {
                        let pruned: serde_json::Map<String, Value> = props
                            .into_iter()
                            .filter(|(_, v)| !is_empty_or_typeless(v))
                            .collect();
                        out.insert(key.clone(), Value::Object(pruned));
                        continue;
                    }
                }
                out.insert(key.clone(), sanitized);
            }
            if let Some(Value::Array(required)) = out.get("required").cloned() {
                let properties = out.get("properties").and_then(|p| p.as_object());
                let filtered: Vec<Value> = required
                    .into_iter()
                    .filter(|entry| {
                        entry
                            .as_str()
                            .map(|name| properties.map(|p| p.contains_key(name)).unwrap_or(false))
                            .unwrap_or(false)
                    })
                    .collect();
                if filtered.is_empty() {
                    out.remove("required");
                } else {
                    out.insert("required".to_string(), Value::Array(filtered));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn is_empty_or_typeless(schema: &Value) -> bool {
    match schema.as_object() {
        None => false,
        Some(map) => map.is_empty() || !TYPE_CARRYING_KEYS.iter().any(|k| map.contains_key(*k)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_disallowed_keywords() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "q": {"type": "string"}
            },
            "required": ["q"],
        });
        let sanitized = sanitize_schema(&schema);
        assert!(sanitized.get("$schema").is_none());
        assert!(sanitized.get("additionalProperties").is_none());
        assert_eq!(sanitized["properties"]["q"]["type"], "string");
        assert_eq!(sanitized["required"], json!(["q"]));
    }

    #[test]
    fn prunes_empty_properties_and_dangling_required() {
        let schema = json!({
            "type": "object",
            "properties": {
                "q": {"type": "string"},
                "ref_field": {"$ref": "#/definitions/Foo"}
            },
            "required": ["q", "ref_field"],
        });
        let sanitized = sanitize_schema(&schema);
        assert!(sanitized["properties"].get("ref_field").is_none());
        assert_eq!(sanitized["required"], json!(["q"]));
    }

    #[test]
    fn required_removed_entirely_when_empty_after_filtering() {
        let schema = json!({
            "type": "object",
            "properties": {},
            "required": ["missing"],
        });
        let sanitized = sanitize_schema(&schema);
        assert!(sanitized.get("required").is_none());
    }

    #[test]
    fn idempotent() {
        let schema = json!({
            "$schema": "x",
            "type": "object",
            "properties": {"q": {"type": "string"}},
            "required": ["q"],
        });
        let once = sanitize_schema(&schema);
        let twice = sanitize_schema(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn input_is_not_mutated() {
        let schema = json!({"$schema": "x", "type": "string"});
        let original = schema.clone();
        let _ = sanitize_schema(&schema);
        assert_eq!(schema, original);
    }
}
