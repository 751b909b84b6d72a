use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::DirectPlusError;

pub(crate) const SORT_KEY: &str = "sort";
pub(crate) const PAGE_NUMBER_KEY: &str = "pageNumber";
pub(crate) const PAGE_SIZE_KEY: &str = "pageSize";
const DEFAULT_SORT_ITEM: &str = "primaryName";
const SUMMARY_VALUE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub const BOTH: [SortDirection; 2] = [SortDirection::Ascending, SortDirection::Descending];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    pub item: String,
    pub direction: SortDirection,
}

impl SortDirective {
    pub fn new(item: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            item: item.into(),
            direction,
        }
    }
}

/// A named bag of search filters plus the sort and paging directives sent with it.
///
/// Values are never mutated in place: paging, re-sorting, splitting and
/// field edits all return a new set. The content hash covers every non-empty
/// attribute and is independent of insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaSet {
    params: BTreeMap<String, Value>,
    sort: Vec<SortDirective>,
    page_number: Option<u32>,
    page_size: Option<u32>,
}

impl Default for CriteriaSet {
    fn default() -> Self {
        Self {
            params: BTreeMap::new(),
            sort: vec![SortDirective::new(
                DEFAULT_SORT_ITEM,
                SortDirection::Ascending,
            )],
            page_number: None,
            page_size: None,
        }
    }
}

impl CriteriaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from a JSON mapping; `sort`, `pageNumber` and `pageSize`
    /// are lifted out of the parameter map.
    pub fn from_map(fields: Map<String, Value>) -> Result<Self, DirectPlusError> {
        Self::default().merged(fields)
    }

    /// Returns a copy with `fields` added, replacing same-named entries.
    pub fn merged(&self, fields: Map<String, Value>) -> Result<Self, DirectPlusError> {
        let mut next = self.clone();
        for (key, value) in fields {
            match key.as_str() {
                SORT_KEY => {
                    next.sort = serde_json::from_value(value).map_err(|err| {
                        DirectPlusError::InvalidArgument(format!(
                            "sort must be a list of {{item, direction}} objects: {err}"
                        ))
                    })?;
                }
                PAGE_NUMBER_KEY => next.page_number = parse_page_field(&key, &value)?,
                PAGE_SIZE_KEY => next.page_size = parse_page_field(&key, &value)?,
                _ => {
                    next.params.insert(key, value);
                }
            }
        }
        Ok(next)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn without(&self, names: &[&str]) -> Self {
        let mut next = self.clone();
        for name in names {
            match *name {
                SORT_KEY => next.sort = Self::default().sort,
                PAGE_NUMBER_KEY => next.page_number = None,
                PAGE_SIZE_KEY => next.page_size = None,
                other => {
                    next.params.remove(other);
                }
            }
        }
        next
    }

    pub fn with_sort(&self, sort: Vec<SortDirective>) -> Self {
        Self {
            sort,
            ..self.clone()
        }
    }

    pub fn with_page(&self, page_number: u32) -> Self {
        Self {
            page_number: Some(page_number),
            ..self.clone()
        }
    }

    pub fn with_default_page_size(&self, page_size: u32) -> Self {
        Self {
            page_size: self.page_size.or(Some(page_size)),
            ..self.clone()
        }
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn sort(&self) -> &[SortDirective] {
        &self.sort
    }

    pub fn page_number(&self) -> Option<u32> {
        self.page_number
    }

    pub fn page_size(&self) -> Option<u32> {
        self.page_size
    }

    /// True when no search filter carries a usable value.
    pub fn is_empty(&self) -> bool {
        self.params.values().all(is_empty_value)
    }

    /// The request payload: non-empty filters plus sort and paging.
    pub fn to_params(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in &self.params {
            if !is_empty_value(value) {
                out.insert(key.clone(), value.clone());
            }
        }
        if !self.sort.is_empty() {
            out.insert(
                SORT_KEY.to_string(),
                Value::Array(
                    self.sort
                        .iter()
                        .map(|directive| {
                            serde_json::json!({
                                "item": directive.item,
                                "direction": directive.direction.as_str(),
                            })
                        })
                        .collect(),
                ),
            );
        }
        if let Some(page_number) = self.page_number {
            out.insert(PAGE_NUMBER_KEY.to_string(), Value::from(page_number));
        }
        if let Some(page_size) = self.page_size {
            out.insert(PAGE_SIZE_KEY.to_string(), Value::from(page_size));
        }
        out
    }

    pub fn canonical_json(&self) -> String {
        let mut out = String::new();
        write_canonical(&Value::Object(self.to_params()), &mut out);
        out
    }

    pub fn hash(&self) -> String {
        let digest = Sha256::digest(self.canonical_json().as_bytes());
        format!("{digest:x}")
    }

    /// Short `key=value` rendering for logs and error context.
    pub fn summary(&self) -> String {
        let parts = self
            .params
            .iter()
            .filter(|(_, value)| !is_empty_value(value))
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{key}={}", truncate_chars(&rendered, SUMMARY_VALUE_MAX_CHARS))
            })
            .collect::<Vec<_>>();
        if parts.is_empty() {
            "<no criteria>".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl Serialize for CriteriaSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_params().serialize(serializer)
    }
}

fn parse_page_field(key: &str, value: &Value) -> Result<Option<u32>, DirectPlusError> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .map(Some)
        .ok_or_else(|| {
            DirectPlusError::InvalidArgument(format!("{key} must be a positive integer, got {value}"))
        })
}

pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// Keys sorted at every depth and empty members dropped, independent of how
// serde_json orders its maps.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries = map
                .iter()
                .filter(|(_, v)| !is_empty_value(v))
                .collect::<Vec<_>>();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out = value.chars().take(max_chars).collect::<String>();
    out.push('…');
    out
}
