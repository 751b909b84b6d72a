//! In-memory stand-ins for the remote search service and entitlement lookup.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{ApiClient, EntitlementOracle, PAGE_DEPTH_MAX, PAGE_SIZE_MAX, SEARCH_OPERATION};
use crate::error::{DirectPlusError, NO_MATCH_CODE};

type Call = (String, Map<String, Value>);

/// Replays a fixed sequence of responses, one per call.
pub(crate) struct ScriptedClient {
    responses: Mutex<VecDeque<Result<Value, DirectPlusError>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedClient {
    pub(crate) fn new(responses: Vec<Result<Value, DirectPlusError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn no_match() -> DirectPlusError {
        DirectPlusError::Remote {
            operation: SEARCH_OPERATION.to_string(),
            status: 404,
            code: Some(NO_MATCH_CODE.to_string()),
            message: "No Match found for the given input criteria".to_string(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    async fn execute(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DirectPlusError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), params.clone()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted response left for {operation}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SortMode {
    /// Every sort field yields its own ordering; descending reverses it.
    Distinct,
    /// Every sort field and direction yields the same ordering.
    Identical,
}

#[derive(Debug, Clone)]
struct Organization {
    index: u64,
    duns: String,
    industry_code: String,
}

/// A fake search service over a generated population of organizations.
///
/// Filters on `industryCodes`, honours sort and paging the way the provider
/// does (50 per page, 20 pages deep) and answers "no match" with code 21501.
pub(crate) struct DatasetClient {
    organizations: Vec<Organization>,
    mode: SortMode,
    unsortable: Vec<String>,
    calls: Mutex<Vec<Call>>,
}

impl DatasetClient {
    /// `count` organizations spread round-robin over `industry_codes`.
    pub(crate) fn new(count: u64, industry_codes: &[&str], mode: SortMode) -> Self {
        let organizations = (0..count)
            .map(|index| Organization {
                index,
                duns: format!("{:09}", 100_000_000 + index),
                industry_code: industry_codes
                    .get((index as usize) % industry_codes.len().max(1))
                    .map(|code| (*code).to_string())
                    .unwrap_or_default(),
            })
            .collect();
        Self {
            organizations,
            mode,
            unsortable: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sort items for which every search reports no match.
    pub(crate) fn with_unsortable(mut self, items: &[&str]) -> Self {
        self.unsortable = items.iter().map(|item| (*item).to_string()).collect();
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Identifiers the service would match for `params`, ignoring paging.
    pub(crate) fn matching_ids(&self, params: &Map<String, Value>) -> BTreeSet<String> {
        self.matching(params)
            .into_iter()
            .map(|org| org.duns.clone())
            .collect()
    }

    fn matching(&self, params: &Map<String, Value>) -> Vec<&Organization> {
        let wanted = params.get("industryCodes").map(|groups| {
            groups
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|group| group.get("code").and_then(Value::as_array))
                .flatten()
                .filter_map(Value::as_str)
                .collect::<BTreeSet<_>>()
        });
        self.organizations
            .iter()
            .filter(|org| {
                wanted
                    .as_ref()
                    .is_none_or(|codes| codes.contains(org.industry_code.as_str()))
            })
            .collect()
    }

    fn sort_key(&self, org: &Organization, item: &str) -> u64 {
        match self.mode {
            SortMode::Identical => org.index,
            SortMode::Distinct => {
                let salt = item
                    .bytes()
                    .fold(0xcbf2_9ce4_8422_2325_u64, |acc, b| {
                        (acc ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
                    });
                mix(org.index ^ salt)
            }
        }
    }
}

fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[async_trait]
impl ApiClient for DatasetClient {
    async fn execute(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DirectPlusError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), params.clone()));
        assert_eq!(operation, SEARCH_OPERATION);

        let (item, descending) = params
            .get("sort")
            .and_then(|sort| sort.get(0))
            .map(|directive| {
                (
                    directive["item"].as_str().unwrap_or_default().to_string(),
                    directive["direction"] == "descending",
                )
            })
            .unwrap_or_else(|| ("primaryName".to_string(), false));
        if self.unsortable.contains(&item) {
            return Err(ScriptedClient::no_match());
        }

        let mut matched = self.matching(params);
        if matched.is_empty() {
            return Err(ScriptedClient::no_match());
        }
        matched.sort_by_key(|org| self.sort_key(org, &item));
        if descending && self.mode == SortMode::Distinct {
            matched.reverse();
        }

        let page_size = params
            .get("pageSize")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(PAGE_SIZE_MAX)) as usize;
        let page_number = params
            .get("pageNumber")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        if page_number > u64::from(PAGE_DEPTH_MAX) {
            return Err(DirectPlusError::Remote {
                operation: SEARCH_OPERATION.to_string(),
                status: 400,
                code: Some("21012".to_string()),
                message: "Requested page exceeds the maximum page depth".to_string(),
            });
        }

        let start = (page_number as usize - 1) * page_size;
        let page = matched
            .iter()
            .skip(start)
            .take(page_size)
            .enumerate()
            .map(|(i, org)| {
                json!({
                    "displaySequence": start + i + 1,
                    "organization": {
                        "duns": org.duns,
                        "primaryName": format!("Organization {}", org.index),
                    }
                })
            })
            .collect::<Vec<_>>();

        Ok(json!({
            "candidatesMatchedQuantity": matched.len(),
            "candidatesReturnedQuantity": page.len(),
            "searchCandidates": page,
            "inquiryDetail": params,
        }))
    }
}

/// Fixed entitlement answer that counts how often it was asked.
pub(crate) struct StaticEntitlements {
    entitled: bool,
    asked: AtomicUsize,
}

impl StaticEntitlements {
    pub(crate) fn new(entitled: bool) -> Self {
        Self {
            entitled,
            asked: AtomicUsize::new(0),
        }
    }

    pub(crate) fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitlementOracle for StaticEntitlements {
    async fn is_entitled(&self, _operation: &str) -> Result<bool, DirectPlusError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.entitled)
    }
}
