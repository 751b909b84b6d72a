//! Endpoint discovery: descriptors parsed from bundled and user-supplied API
//! documents, parameter binding and the operation registry.

use std::collections::BTreeMap;
use std::path::Path;

use reqwest::{Method, Url};
use rust_embed::RustEmbed;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::DirectPlusError;

mod openapi;
mod validate;

pub(crate) use validate::validate;

pub const SPECS_DIR_ENV: &str = "DIRECTPLUS_SPECS_DIR";

#[derive(RustEmbed)]
#[folder = "specs/"]
struct BundledSpecs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Body,
}

impl ParamLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Body => "body",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: Value,
}

#[derive(Debug, Clone)]
pub struct EndpointDescriptor {
    pub id: String,
    pub method: Method,
    pub base: String,
    pub path: String,
    pub summary: Option<String>,
    pub parameters: Vec<ParameterSpec>,
}

/// A request ready to send: the final URL plus the values for each location.
#[derive(Debug, Clone)]
pub struct BoundRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl EndpointDescriptor {
    /// Registry key, e.g. `POST searchCriteria`.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.id)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|param| param.name == name)
    }

    /// Validates `params` and places each value where the endpoint expects it.
    pub fn bind(&self, params: &Map<String, Value>) -> Result<BoundRequest, DirectPlusError> {
        let mut path_values = BTreeMap::new();
        let mut query = Vec::new();
        let mut headers = Vec::new();
        let mut body = Map::new();

        for (name, value) in params {
            let spec = self.parameter(name).ok_or_else(|| {
                DirectPlusError::InvalidArgument(format!(
                    "Parameter '{name}' is not accepted by {}.",
                    self.id
                ))
            })?;
            validate(name, value, &spec.schema)?;
            if value.is_null() {
                continue;
            }
            match spec.location {
                ParamLocation::Path => {
                    path_values.insert(name.as_str(), scalar_text(value));
                }
                ParamLocation::Query => query.push((name.clone(), scalar_text(value))),
                ParamLocation::Header => headers.push((name.clone(), scalar_text(value))),
                ParamLocation::Body => {
                    body.insert(name.clone(), value.clone());
                }
            }
        }

        if let Some(missing) = self
            .parameters
            .iter()
            .find(|spec| spec.required && params.get(&spec.name).is_none_or(Value::is_null))
        {
            return Err(DirectPlusError::InvalidArgument(format!(
                "Parameter '{}' is required by {}.",
                missing.name, self.id
            )));
        }

        let url = self.url(&path_values)?;
        let body = (self.method == Method::POST).then_some(Value::Object(body));
        Ok(BoundRequest {
            method: self.method.clone(),
            url,
            query,
            headers,
            body,
        })
    }

    fn url(&self, path_values: &BTreeMap<&str, String>) -> Result<Url, DirectPlusError> {
        let mut url = Url::parse(&self.base).map_err(|err| {
            DirectPlusError::Specification(format!("Invalid base URL '{}': {err}", self.base))
        })?;
        let base_path = url.path().trim_end_matches('/').to_string();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                DirectPlusError::Specification(format!("Base URL '{}' cannot carry a path", self.base))
            })?;
            segments.clear();
            for segment in base_path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
            for segment in self.path.split('/').filter(|s| !s.is_empty()) {
                match segment
                    .strip_prefix('{')
                    .and_then(|rest| rest.strip_suffix('}'))
                {
                    Some(name) => {
                        let value = path_values.get(name).ok_or_else(|| {
                            DirectPlusError::InvalidArgument(format!(
                                "Path parameter '{name}' is required by {}.",
                                self.id
                            ))
                        })?;
                        segments.push(value);
                    }
                    None => {
                        segments.push(segment);
                    }
                }
            }
        }
        Ok(url)
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// Every known operation, keyed `METHOD id`.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, EndpointDescriptor>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The documents shipped with the binary.
    pub fn bundled() -> Result<Self, DirectPlusError> {
        let mut registry = Self::new();
        for file in BundledSpecs::iter() {
            let Some(asset) = BundledSpecs::get(&file) else {
                continue;
            };
            let doc: Value = serde_json::from_slice(&asset.data).map_err(|source| {
                DirectPlusError::Specification(format!("Bundled document {file} is invalid: {source}"))
            })?;
            registry.add_document(&file, &doc)?;
        }
        Ok(registry)
    }

    /// Bundled documents, plus any in `DIRECTPLUS_SPECS_DIR`, with the
    /// `DIRECTPLUS_BASE` override applied.
    pub fn from_env() -> Result<Self, DirectPlusError> {
        let mut registry = Self::bundled()?;
        if let Some(dir) = std::env::var_os(SPECS_DIR_ENV).filter(|dir| !dir.is_empty()) {
            registry.load_dir(Path::new(&dir))?;
        }
        if let Some(base) = crate::sources::base_override() {
            registry = registry.with_base(&base);
        }
        Ok(registry)
    }

    /// Adds every `*.json` document in `dir`, in file-name order.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, DirectPlusError> {
        let mut files = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        files.sort();

        let mut added = 0;
        for file in files {
            let raw = std::fs::read(&file)?;
            let doc: Value = serde_json::from_slice(&raw).map_err(|source| {
                DirectPlusError::Specification(format!(
                    "{} is not valid JSON: {source}",
                    file.display()
                ))
            })?;
            added += self.add_document(&file.display().to_string(), &doc)?;
        }
        Ok(added)
    }

    pub fn add_document(&mut self, source: &str, doc: &Value) -> Result<usize, DirectPlusError> {
        let endpoints = openapi::parse_document(doc).map_err(|err| match err {
            DirectPlusError::Specification(message) => {
                DirectPlusError::Specification(format!("{source}: {message}"))
            }
            other => other,
        })?;
        let count = endpoints.len();
        for endpoint in endpoints {
            self.insert(endpoint)?;
        }
        debug!(source, endpoints = count, "Loaded API document");
        Ok(count)
    }

    pub fn insert(&mut self, endpoint: EndpointDescriptor) -> Result<(), DirectPlusError> {
        let key = endpoint.key();
        if self.endpoints.contains_key(&key) {
            return Err(DirectPlusError::Specification(format!(
                "Endpoint {key} is declared more than once."
            )));
        }
        self.endpoints.insert(key, endpoint);
        Ok(())
    }

    /// Looks up by full key (`GET dataBlocks`) or by bare id when only one
    /// method carries it.
    pub fn get(&self, id: &str) -> Result<&EndpointDescriptor, DirectPlusError> {
        if let Some(endpoint) = self.endpoints.get(id) {
            return Ok(endpoint);
        }
        let mut matches = self.endpoints.values().filter(|endpoint| endpoint.id == id);
        match (matches.next(), matches.next()) {
            (Some(endpoint), None) => Ok(endpoint),
            _ => Err(DirectPlusError::EndpointNotFound { id: id.to_string() }),
        }
    }

    /// True when some endpoint carries `id`, under any method.
    pub fn contains_id(&self, id: &str) -> bool {
        self.endpoints.values().any(|endpoint| endpoint.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Points every endpoint at `base`.
    pub fn with_base(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        for endpoint in self.endpoints.values_mut() {
            endpoint.base = base.to_string();
        }
        self
    }
}
