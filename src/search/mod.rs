//! Search-result harvesting: criteria sets, the search executor, strategy
//! selection (simple, paged, cap-busting, split), and active-criteria management.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::DirectPlusError;

mod criteria;
mod executor;
mod harvest;
mod manager;
mod split;

#[cfg(test)]
pub(crate) mod testing;

pub use criteria::{CriteriaSet, SortDirection, SortDirective};
pub use executor::{
    CandidateOrganization, SearchCandidate, SearchExecutor, SearchRecord, SearchResult,
};
pub use harvest::{HarvestReport, HarvestStatus, Harvester, Strategy};
pub use manager::{CriteriaInput, SearchManager};
pub use split::split;

/// Operation id of the criteria search endpoint.
pub const SEARCH_OPERATION: &str = "searchCriteria";
/// Entitlement that unlocks bulk multi-record resolution.
pub const BULK_OPERATION: &str = "multiProcessJobSubmissionv2";

/// Maximum candidates per page.
pub const PAGE_SIZE_MAX: u32 = 50;
/// Deepest page the provider will serve for one sort order.
pub const PAGE_DEPTH_MAX: u32 = 20;
/// Results reachable by paging a single sort order (`PAGE_SIZE_MAX * PAGE_DEPTH_MAX`).
pub const PAGED_CEILING: u64 = 1_000;
/// Match count above which the provider will not enumerate at all.
pub const ENUMERATION_CEILING: u64 = 3_000;
pub const DEFAULT_MAX_SPLIT_DEPTH: usize = 6;

/// Executes a named remote operation with JSON parameters.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn execute(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DirectPlusError>;
}

/// Answers whether the account may use an operation.
#[async_trait]
pub trait EntitlementOracle: Send + Sync {
    async fn is_entitled(&self, operation: &str) -> Result<bool, DirectPlusError>;
}
