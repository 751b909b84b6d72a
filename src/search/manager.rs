use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::criteria::CriteriaSet;
use super::executor::{SearchExecutor, SearchRecord};
use super::harvest::{HarvestReport, HarvestStatus, Harvester};
use super::{ApiClient, EntitlementOracle};
use crate::error::DirectPlusError;

/// What a harvest should run against.
#[derive(Debug, Clone)]
pub enum CriteriaInput {
    /// The manager's active criteria.
    Active,
    Set(CriteriaSet),
    Map(Map<String, Value>),
}

impl From<CriteriaSet> for CriteriaInput {
    fn from(value: CriteriaSet) -> Self {
        Self::Set(value)
    }
}

impl From<Map<String, Value>> for CriteriaInput {
    fn from(value: Map<String, Value>) -> Self {
        Self::Map(value)
    }
}

impl TryFrom<Value> for CriteriaInput {
    type Error = DirectPlusError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Self::Active),
            Value::Object(map) => Ok(Self::Map(map)),
            other => Err(DirectPlusError::InvalidArgument(format!(
                "criteria must be a JSON object or null, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Entry point for searching: holds the active criteria and runs harvests.
///
/// The active criteria only change through `add_criteria`/`remove_criteria`;
/// harvesting never writes to them.
pub struct SearchManager {
    harvester: Harvester,
    active: Mutex<CriteriaSet>,
}

impl SearchManager {
    pub fn new(client: Arc<dyn ApiClient>, entitlements: Arc<dyn EntitlementOracle>) -> Self {
        Self::with_harvester(Harvester::new(SearchExecutor::new(client), entitlements))
    }

    pub fn with_harvester(harvester: Harvester) -> Self {
        Self {
            harvester,
            active: Mutex::new(CriteriaSet::new()),
        }
    }

    /// Merges `fields` into the active criteria, replacing same-named entries.
    pub async fn add_criteria(&self, fields: Map<String, Value>) -> Result<(), DirectPlusError> {
        let mut active = self.active.lock().await;
        *active = active.merged(fields)?;
        debug!(criteria = %active.summary(), "Active criteria updated");
        Ok(())
    }

    pub async fn remove_criteria(&self, names: &[&str]) {
        let mut active = self.active.lock().await;
        *active = active.without(names);
    }

    pub async fn get_criteria(&self) -> Map<String, Value> {
        self.active.lock().await.to_params()
    }

    pub async fn active_criteria(&self) -> CriteriaSet {
        self.active.lock().await.clone()
    }

    /// Every unique identifier matching the criteria.
    pub async fn get_hits(
        &self,
        input: impl Into<CriteriaInput>,
    ) -> Result<BTreeSet<String>, DirectPlusError> {
        Ok(self.harvest(input).await?.ids)
    }

    pub async fn harvest(
        &self,
        input: impl Into<CriteriaInput>,
    ) -> Result<HarvestReport, DirectPlusError> {
        let criteria = self.resolve(input.into()).await?;
        let report = self.harvester.harvest(&criteria).await?;
        if report.status == HarvestStatus::Partial {
            warn!(
                hash = %report.criteria_hash,
                matched = report.matched,
                collected = report.ids.len(),
                "Returning a partial hit list"
            );
        }
        Ok(report)
    }

    /// The provider's match count for `fields`; 0 when nothing matches.
    pub async fn get_count(&self, fields: Map<String, Value>) -> Result<u64, DirectPlusError> {
        let criteria = CriteriaSet::from_map(fields)?;
        let result = self.harvester.executor().search(&criteria).await?;
        Ok(result.candidates_matched_quantity)
    }

    pub async fn searches(&self) -> Vec<SearchRecord> {
        self.harvester.executor().searches().await
    }

    async fn resolve(&self, input: CriteriaInput) -> Result<CriteriaSet, DirectPlusError> {
        match input {
            CriteriaInput::Active => Ok(self.active.lock().await.clone()),
            CriteriaInput::Set(criteria) => Ok(criteria),
            CriteriaInput::Map(fields) => CriteriaSet::from_map(fields),
        }
    }
}
