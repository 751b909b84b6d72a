//! Reads endpoint descriptors out of Swagger 2 and OpenAPI 3 documents.

use reqwest::Method;
use serde_json::{Map, Value};

use super::{EndpointDescriptor, ParamLocation, ParameterSpec};
use crate::error::DirectPlusError;

const SUPPORTED_METHODS: [&str; 2] = ["get", "post"];

/// Every GET/POST operation declared in `doc`.
pub(crate) fn parse_document(doc: &Value) -> Result<Vec<EndpointDescriptor>, DirectPlusError> {
    if let Some(version) = doc.get("swagger").and_then(Value::as_str) {
        if !version.starts_with('2') {
            return Err(unsupported("Swagger", version));
        }
        let base = swagger_base(doc)?;
        return parse_paths(doc, &base, swagger_parameters);
    }
    if let Some(version) = doc.get("openapi").and_then(Value::as_str) {
        if !version.starts_with('3') {
            return Err(unsupported("OpenAPI", version));
        }
        let base = openapi_base(doc)?;
        return parse_paths(doc, &base, openapi_parameters);
    }
    Err(DirectPlusError::Specification(
        "Document declares neither a 'swagger' nor an 'openapi' version.".into(),
    ))
}

fn unsupported(kind: &str, version: &str) -> DirectPlusError {
    DirectPlusError::Specification(format!("{kind} version {version} is not supported."))
}

fn swagger_base(doc: &Value) -> Result<String, DirectPlusError> {
    let host = doc.get("host").and_then(Value::as_str).unwrap_or_default();
    let scheme = doc
        .get("schemes")
        .and_then(|schemes| schemes.get(0))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if host.is_empty() || scheme.is_empty() {
        return Err(DirectPlusError::Specification(
            "Could not determine the host from 'schemes' and 'host'.".into(),
        ));
    }
    Ok(format!("{scheme}://{host}"))
}

fn openapi_base(doc: &Value) -> Result<String, DirectPlusError> {
    doc.get("servers")
        .and_then(|servers| servers.get(0))
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(|url| url.trim_end_matches('/').to_string())
        .ok_or_else(|| {
            DirectPlusError::Specification("Could not determine the host from 'servers'.".into())
        })
}

fn parse_paths(
    doc: &Value,
    base: &str,
    parameters: fn(&str, &Value) -> Vec<ParameterSpec>,
) -> Result<Vec<EndpointDescriptor>, DirectPlusError> {
    let Some(paths) = doc.get("paths").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for (path, item) in paths {
        let path_id = item.get("x-DNB-ID").and_then(Value::as_str);
        for method in SUPPORTED_METHODS {
            let Some(operation) = item.get(method) else {
                continue;
            };
            let id = path_id
                .or_else(|| operation.get("operationId").and_then(Value::as_str))
                .ok_or_else(|| {
                    DirectPlusError::Specification(format!(
                        "{} {path} has neither x-DNB-ID nor operationId.",
                        method.to_ascii_uppercase()
                    ))
                })?;
            out.push(EndpointDescriptor {
                id: id.to_string(),
                method: if method == "post" { Method::POST } else { Method::GET },
                base: base.to_string(),
                path: path.clone(),
                summary: operation
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                parameters: parameters(method, operation),
            });
        }
    }
    Ok(out)
}

fn location(raw: Option<&str>) -> ParamLocation {
    match raw {
        Some("path") => ParamLocation::Path,
        Some("header") => ParamLocation::Header,
        Some("body") => ParamLocation::Body,
        _ => ParamLocation::Query,
    }
}

fn is_required(param: &Value) -> bool {
    param.get("required").and_then(Value::as_bool).unwrap_or(false)
}

// Swagger 2 keeps the schema keywords on the parameter object itself.
fn swagger_parameters(_method: &str, operation: &Value) -> Vec<ParameterSpec> {
    declared_parameters(operation)
        .map(|param| {
            let mut schema = param.as_object().cloned().unwrap_or_default();
            for key in ["name", "in", "required", "description"] {
                schema.remove(key);
            }
            ParameterSpec {
                name: param_name(param),
                location: location(param.get("in").and_then(Value::as_str)),
                required: is_required(param),
                schema: Value::Object(schema),
            }
        })
        .collect()
}

// OpenAPI 3 nests the schema; POST bodies are described by `requestBody`.
fn openapi_parameters(method: &str, operation: &Value) -> Vec<ParameterSpec> {
    let mut out = declared_parameters(operation)
        .map(|param| ParameterSpec {
            name: param_name(param),
            location: location(param.get("in").and_then(Value::as_str)),
            required: is_required(param),
            schema: param.get("schema").cloned().unwrap_or_else(json_object),
        })
        .collect::<Vec<_>>();

    if method == "post" {
        let schema = operation
            .pointer("/requestBody/content/application~1json/schema")
            .cloned()
            .unwrap_or_else(json_object);
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect::<Vec<_>>())
            .unwrap_or_default();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            out.extend(properties.iter().map(|(name, property)| ParameterSpec {
                name: name.clone(),
                location: ParamLocation::Body,
                required: required.contains(&name.as_str()),
                schema: property.clone(),
            }));
        }
    }
    out
}

fn declared_parameters(operation: &Value) -> impl Iterator<Item = &Value> {
    operation
        .get("parameters")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|param| param.get("name").and_then(Value::as_str).is_some())
}

fn param_name(param: &Value) -> String {
    param
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn json_object() -> Value {
    Value::Object(Map::new())
}
