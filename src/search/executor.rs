use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::criteria::CriteriaSet;
use super::{ApiClient, PAGE_SIZE_MAX, SEARCH_OPERATION};
use crate::error::DirectPlusError;

/// One decoded page of a criteria search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(default)]
    pub candidates_matched_quantity: u64,
    #[serde(default)]
    pub candidates_returned_quantity: u64,
    #[serde(default)]
    pub search_candidates: Vec<SearchCandidate>,
    #[serde(default)]
    pub inquiry_detail: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCandidate {
    #[serde(default)]
    pub display_sequence: Option<u32>,
    #[serde(default)]
    pub organization: CandidateOrganization,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateOrganization {
    #[serde(default)]
    pub duns: Option<String>,
    #[serde(default)]
    pub primary_name: Option<String>,
}

impl SearchResult {
    pub fn empty(inquiry_detail: Map<String, Value>) -> Self {
        Self {
            inquiry_detail,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates_matched_quantity == 0
    }

    pub fn identifiers(&self) -> BTreeSet<String> {
        self.search_candidates
            .iter()
            .filter_map(|candidate| candidate.organization.duns.as_deref())
            .map(str::trim)
            .filter(|duns| !duns.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Pages needed to see every match at the maximum page size.
    pub fn page_count(&self) -> u64 {
        self.candidates_matched_quantity
            .div_ceil(u64::from(PAGE_SIZE_MAX))
    }

    /// The provider's echo of the criteria, or `fallback` when nothing was echoed.
    pub fn echoed_criteria(&self, fallback: &CriteriaSet) -> Result<CriteriaSet, DirectPlusError> {
        if self.inquiry_detail.is_empty() {
            return Ok(fallback.clone());
        }
        CriteriaSet::from_map(self.inquiry_detail.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRecord {
    pub sequence: usize,
    pub hash: String,
    pub criteria: CriteriaSet,
    pub result: SearchResult,
}

/// Issues criteria searches and keeps a log of every executed search.
pub struct SearchExecutor {
    client: Arc<dyn ApiClient>,
    issued: AtomicUsize,
    log: Mutex<HashMap<String, SearchRecord>>,
}

impl SearchExecutor {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self {
            client,
            issued: AtomicUsize::new(0),
            log: Mutex::new(HashMap::new()),
        }
    }

    /// Runs exactly one remote search. A provider "no match" answer comes
    /// back as an empty result rather than an error.
    pub async fn search(&self, criteria: &CriteriaSet) -> Result<SearchResult, DirectPlusError> {
        let criteria = criteria.with_default_page_size(PAGE_SIZE_MAX);
        if criteria.is_empty() {
            return Err(DirectPlusError::SearchConfiguration(
                "There are no criteria to search with.".into(),
            ));
        }

        let hash = criteria.hash();
        let params = criteria.to_params();
        let sequence = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            hash = %hash,
            sequence,
            page = ?criteria.page_number(),
            criteria = %criteria.summary(),
            "Executing criteria search"
        );

        let result = match self.client.execute(SEARCH_OPERATION, &params).await {
            Ok(body) => serde_json::from_value::<SearchResult>(body).map_err(|source| {
                DirectPlusError::ApiJson {
                    api: SEARCH_OPERATION.to_string(),
                    source,
                }
            })?,
            Err(err) if err.is_no_match() => {
                debug!(hash = %hash, "Search matched no candidates");
                SearchResult::empty(params)
            }
            Err(err) if err.is_authorization() => return Err(err),
            Err(err) => {
                error!(hash = %hash, criteria = %criteria.summary(), error = %err, "Criteria search failed");
                return Err(DirectPlusError::SearchFailure {
                    criteria: criteria.summary(),
                    source: Box::new(err),
                });
            }
        };

        if result.candidates_returned_quantity > u64::from(PAGE_SIZE_MAX) {
            warn!(
                hash = %hash,
                returned = result.candidates_returned_quantity,
                "Provider returned more candidates than the page size allows"
            );
        }

        self.log.lock().await.insert(
            hash.clone(),
            SearchRecord {
                sequence,
                hash,
                criteria,
                result: result.clone(),
            },
        );
        Ok(result)
    }

    /// Number of remote searches issued so far.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Logged searches in the order they were issued.
    pub async fn searches(&self) -> Vec<SearchRecord> {
        let mut records = self.log.lock().await.values().cloned().collect::<Vec<_>>();
        records.sort_by_key(|record| record.sequence);
        records
    }

    pub async fn search_by_hash(&self, hash: &str) -> Option<SearchRecord> {
        self.log.lock().await.get(hash).cloned()
    }
}
