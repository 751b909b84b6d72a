//! Checks parameter values against the JSON-schema subset used by the
//! Direct+ API documents.

use serde_json::Value;

use crate::error::DirectPlusError;

fn invalid(message: String) -> DirectPlusError {
    DirectPlusError::InvalidArgument(message)
}

/// Validates `value` for the parameter `name` against `schema`.
///
/// Absent `type` means string; absent `nullable` means null is accepted.
pub(crate) fn validate(name: &str, value: &Value, schema: &Value) -> Result<(), DirectPlusError> {
    if value.is_null() {
        if schema.get("nullable").and_then(Value::as_bool) == Some(false) {
            return Err(invalid(format!("Parameter '{name}' must not be null.")));
        }
        return Ok(());
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        return Err(invalid(format!(
            "Parameter '{name}' must be one of {}, not {value}.",
            Value::Array(allowed.clone())
        )));
    }

    let kind = schema.get("type").and_then(Value::as_str).unwrap_or("string");
    match kind {
        "integer" => {
            if !(value.is_i64() || value.is_u64()) {
                return Err(wrong_type(name, kind, value));
            }
            check_bounds(name, value, schema)
        }
        "number" => {
            if !value.is_number() {
                return Err(wrong_type(name, kind, value));
            }
            check_bounds(name, value, schema)
        }
        "string" => {
            let Some(text) = value.as_str() else {
                return Err(wrong_type(name, kind, value));
            };
            let len = text.chars().count() as u64;
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64)
                && len < min
            {
                return Err(invalid(format!(
                    "Parameter '{name}' must be at least {min} characters long."
                )));
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64)
                && len > max
            {
                return Err(invalid(format!(
                    "Parameter '{name}' must be at most {max} characters long."
                )));
            }
            Ok(())
        }
        "boolean" => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(wrong_type(name, kind, value))
            }
        }
        "array" => {
            let Some(items) = value.as_array() else {
                return Err(wrong_type(name, kind, value));
            };
            let len = items.len() as u64;
            if let Some(min) = schema.get("minItems").and_then(Value::as_u64)
                && len < min
            {
                return Err(invalid(format!(
                    "Parameter '{name}' must have at least {min} items."
                )));
            }
            if let Some(max) = schema.get("maxItems").and_then(Value::as_u64)
                && len > max
            {
                return Err(invalid(format!(
                    "Parameter '{name}' must have at most {max} items."
                )));
            }
            let item_schema = schema.get("items").cloned().unwrap_or(Value::Null);
            for (i, item) in items.iter().enumerate() {
                validate(&format!("{name}[{i}]"), item, &item_schema)?;
            }
            Ok(())
        }
        "object" => {
            let Some(fields) = value.as_object() else {
                return Err(wrong_type(name, kind, value));
            };
            let properties = schema.get("properties").and_then(Value::as_object);
            let open = schema.get("additionalProperties").and_then(Value::as_bool) == Some(true);
            if let Some(properties) = properties {
                for (key, field) in fields {
                    match properties.get(key) {
                        Some(field_schema) => {
                            validate(&format!("{name}.{key}"), field, field_schema)?;
                        }
                        None if open => {}
                        None => {
                            return Err(invalid(format!(
                                "Parameter '{name}' has an invalid property: {key}."
                            )));
                        }
                    }
                }
            }
            for required in schema
                .get("required")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
            {
                if !fields.contains_key(required) {
                    return Err(invalid(format!(
                        "Parameter '{name}' is missing required property: {required}."
                    )));
                }
            }
            Ok(())
        }
        other => Err(DirectPlusError::Specification(format!(
            "Parameter '{name}' declares unsupported type '{other}'."
        ))),
    }
}

fn wrong_type(name: &str, kind: &str, value: &Value) -> DirectPlusError {
    invalid(format!(
        "Parameter '{name}' must be of type '{kind}', not {}.",
        json_type(value)
    ))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_bounds(name: &str, value: &Value, schema: &Value) -> Result<(), DirectPlusError> {
    let Some(number) = value.as_f64() else {
        return Ok(());
    };
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64)
        && number < min
    {
        return Err(invalid(format!(
            "Parameter '{name}' must be greater than or equal to {min}."
        )));
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64)
        && number > max
    {
        return Err(invalid(format!(
            "Parameter '{name}' must be less than or equal to {max}."
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(result: Result<(), DirectPlusError>) -> String {
        result.expect_err("validation should fail").to_string()
    }

    #[test]
    fn null_is_accepted_unless_not_nullable() {
        assert!(validate("primaryName", &Value::Null, &json!({"type": "string"})).is_ok());
        let msg = message(validate(
            "primaryName",
            &Value::Null,
            &json!({"type": "string", "nullable": false}),
        ));
        assert!(msg.contains("must not be null"));
    }

    #[test]
    fn enum_values_are_enforced() {
        let schema = json!({"type": "string", "enum": ["ascending", "descending"]});
        assert!(validate("direction", &json!("ascending"), &schema).is_ok());
        let msg = message(validate("direction", &json!("up"), &schema));
        assert!(msg.contains("must be one of"));
    }

    #[test]
    fn types_are_checked_with_string_as_default() {
        assert!(validate("duns", &json!("804735132"), &json!({})).is_ok());
        let msg = message(validate("duns", &json!(804735132), &json!({})));
        assert!(msg.contains("of type 'string', not integer"));

        assert!(validate("pageSize", &json!(50), &json!({"type": "integer"})).is_ok());
        assert!(validate("pageSize", &json!(2.5), &json!({"type": "integer"})).is_err());
        assert!(validate("revenue", &json!(2.5), &json!({"type": "number"})).is_ok());
        assert!(validate("isBranch", &json!("yes"), &json!({"type": "boolean"})).is_err());
    }

    #[test]
    fn numeric_bounds_are_inclusive() {
        let schema = json!({"type": "integer", "minimum": 1, "maximum": 50});
        assert!(validate("pageSize", &json!(1), &schema).is_ok());
        assert!(validate("pageSize", &json!(50), &schema).is_ok());
        assert!(message(validate("pageSize", &json!(51), &schema)).contains("less than or equal to 50"));
        assert!(message(validate("pageSize", &json!(0), &schema)).contains("greater than or equal to 1"));
    }

    #[test]
    fn string_lengths_count_characters() {
        let schema = json!({"type": "string", "minLength": 2, "maxLength": 2});
        assert!(validate("countryISOAlpha2Code", &json!("SE"), &schema).is_ok());
        assert!(validate("countryISOAlpha2Code", &json!("Ö"), &schema).is_err());
        assert!(validate("countryISOAlpha2Code", &json!("SWE"), &schema).is_err());
    }

    #[test]
    fn array_items_are_validated_recursively() {
        let schema = json!({
            "type": "array",
            "minItems": 1,
            "items": {
                "type": "object",
                "required": ["code"],
                "properties": {
                    "code": {"type": "array", "items": {"type": "string"}},
                    "typeDnbCode": {"type": "integer"}
                }
            }
        });
        assert!(
            validate(
                "industryCodes",
                &json!([{"code": ["7372"], "typeDnbCode": 399}]),
                &schema
            )
            .is_ok()
        );
        assert!(message(validate("industryCodes", &json!([]), &schema)).contains("at least 1 items"));
        let msg = message(validate(
            "industryCodes",
            &json!([{"code": [7372]}]),
            &schema,
        ));
        assert!(msg.contains("industryCodes[0].code[0]"));
        let msg = message(validate("industryCodes", &json!([{"typeDnbCode": 399}]), &schema));
        assert!(msg.contains("missing required property: code"));
    }

    #[test]
    fn unknown_object_properties_are_rejected() {
        let schema = json!({
            "type": "object",
            "properties": {"minimumValue": {"type": "integer"}}
        });
        let msg = message(validate(
            "numberOfEmployees",
            &json!({"minimumValue": 1, "mean": 5}),
            &schema,
        ));
        assert!(msg.contains("invalid property: mean"));

        let open = json!({
            "type": "object",
            "additionalProperties": true,
            "properties": {"minimumValue": {"type": "integer"}}
        });
        assert!(validate("numberOfEmployees", &json!({"mean": 5}), &open).is_ok());
    }

    #[test]
    fn unsupported_types_are_a_specification_error() {
        let err = validate("x", &json!("v"), &json!({"type": "file"})).unwrap_err();
        assert!(matches!(err, DirectPlusError::Specification(_)));
    }
}
