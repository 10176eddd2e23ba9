use serde_json::Value;

use crate::core::manifest::JsonSchema;

/// Outcome of validating a parsed model response against an output schema.
/// A failed validation is a normal negative result, not an error.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Parse raw model text as JSON, tolerating a markdown code fence around
/// the payload (with or without a `json` language tag).
pub fn parse_model_json(text: &str) -> Result<Value, String> {
    let mut clean = text.trim();
    if let Some(rest) = clean.strip_prefix("```json") {
        clean = rest;
    } else if let Some(rest) = clean.strip_prefix("```") {
        clean = rest;
    }
    if let Some(rest) = clean.strip_suffix("```") {
        clean = rest;
    }
    serde_json::from_str(clean.trim()).map_err(|e| e.to_string())
}

/// Validate a value against the simplified JSON-Schema contract. Errors are
/// flattened `path message` strings with `root` standing in for the top
/// level, e.g. `/items/0 must be string`.
pub fn validate(value: &Value, schema: &JsonSchema) -> ValidationReport {
    let mut errors = Vec::new();
    validate_node(value, schema, "", &mut errors);
    if errors.is_empty() {
        ValidationReport::ok()
    } else {
        ValidationReport::failed(errors)
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "root" } else { path }
}

fn validate_node(value: &Value, schema: &JsonSchema, path: &str, errors: &mut Vec<String>) {
    if value.is_null() && schema.nullable.unwrap_or(false) {
        return;
    }

    if let Some(expected) = schema.schema_type.as_deref() {
        if !type_matches(value, expected) {
            errors.push(format!("{} must be {}", display_path(path), expected));
            return;
        }
    }

    if let Some(allowed) = &schema.enum_values {
        if !allowed.contains(value) {
            errors.push(format!(
                "{} must be equal to one of the allowed values",
                display_path(path)
            ));
        }
    }

    match value {
        Value::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = schema.min_length {
                if len < min {
                    errors.push(format!(
                        "{} must NOT have fewer than {} characters",
                        display_path(path),
                        min
                    ));
                }
            }
            if let Some(max) = schema.max_length {
                if len > max {
                    errors.push(format!(
                        "{} must NOT have more than {} characters",
                        display_path(path),
                        max
                    ));
                }
            }
        }
        Value::Number(n) => {
            let f = n.as_f64().unwrap_or(0.0);
            if let Some(min) = schema.minimum {
                if f < min {
                    errors.push(format!("{} must be >= {}", display_path(path), min));
                }
            }
            if let Some(max) = schema.maximum {
                if f > max {
                    errors.push(format!("{} must be <= {}", display_path(path), max));
                }
            }
        }
        Value::Object(fields) => {
            if let Some(required) = &schema.required {
                for key in required {
                    if !fields.contains_key(key) {
                        errors.push(format!(
                            "{} must have required property '{}'",
                            display_path(path),
                            key
                        ));
                    }
                }
            }
            if let Some(properties) = &schema.properties {
                for (key, child_schema) in properties {
                    if let Some(child) = fields.get(key) {
                        let child_path = format!("{}/{}", path, key);
                        validate_node(child, child_schema, &child_path, errors);
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = &schema.items {
                for (index, item) in items.iter().enumerate() {
                    let child_path = format!("{}/{}", path, index);
                    validate_node(item, item_schema, &child_path, errors);
                }
            }
        }
        _ => {}
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type names are not enforced.
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn schema(value: serde_json::Value) -> JsonSchema {
        serde_json::from_value(value).expect("test schema should parse")
    }

    #[test]
    fn parses_bare_json() {
        assert_eq!(parse_model_json(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn parses_fenced_json_with_and_without_language_tag() {
        let fenced = "```json\n{\"a\":1}\n```";
        let plain_fence = "```\n{\"a\":1}\n```";
        let bare = "{\"a\":1}";
        assert_eq!(parse_model_json(fenced).unwrap(), json!({"a": 1}));
        assert_eq!(parse_model_json(plain_fence).unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_model_json(fenced).unwrap(),
            parse_model_json(bare).unwrap()
        );
    }

    #[test]
    fn reports_parse_failure_without_panicking() {
        let err = parse_model_json("{not valid").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn accepts_matching_object() {
        let s = schema(json!({
            "type": "object",
            "properties": {"a": {"type": "number"}},
            "required": ["a"]
        }));
        let report = validate(&json!({"a": 1}), &s);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn missing_required_property_names_the_field() {
        let s = schema(json!({
            "type": "object",
            "properties": {"summary": {"type": "string"}},
            "required": ["summary"]
        }));
        let report = validate(&json!({}), &s);
        assert!(!report.valid);
        assert!(
            report.errors.iter().any(|e| e.contains("summary")),
            "errors: {:?}",
            report.errors
        );
    }

    #[test]
    fn type_mismatch_reports_nested_path() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {"type": "string"}}
            }
        }));
        let report = validate(&json!({"items": ["ok", 5]}), &s);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["/items/1 must be string"]);
    }

    #[test]
    fn integer_type_rejects_fractions() {
        let s = schema(json!({"type": "integer"}));
        assert!(validate(&json!(3), &s).valid);
        assert!(!validate(&json!(3.5), &s).valid);
    }

    #[test]
    fn enum_and_bounds_are_enforced() {
        let s = schema(json!({"type": "string", "enum": ["low", "high"]}));
        assert!(validate(&json!("low"), &s).valid);
        assert!(!validate(&json!("medium"), &s).valid);

        let n = schema(json!({"type": "number", "minimum": 0, "maximum": 10}));
        assert!(validate(&json!(5), &n).valid);
        assert!(!validate(&json!(-1), &n).valid);
        assert!(!validate(&json!(11), &n).valid);

        let len = schema(json!({"type": "string", "minLength": 2, "maxLength": 3}));
        assert!(validate(&json!("ab"), &len).valid);
        assert!(!validate(&json!("a"), &len).valid);
        assert!(!validate(&json!("abcd"), &len).valid);
    }

    #[test]
    fn nullable_allows_null_in_place_of_type() {
        let s = schema(json!({"type": "string", "nullable": true}));
        assert!(validate(&json!(null), &s).valid);
        let strict = schema(json!({"type": "string"}));
        assert!(!validate(&json!(null), &strict).valid);
    }

    #[test]
    fn untyped_schema_accepts_anything() {
        let s = JsonSchema {
            properties: Some(BTreeMap::new()),
            ..Default::default()
        };
        assert!(validate(&json!({"anything": [1, 2]}), &s).valid);
    }
}
