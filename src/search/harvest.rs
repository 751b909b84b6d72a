use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::criteria::{CriteriaSet, PAGE_NUMBER_KEY, SortDirection, SortDirective};
use super::executor::{SearchExecutor, SearchResult};
use super::split::split;
use super::{
    BULK_OPERATION, DEFAULT_MAX_SPLIT_DEPTH, ENUMERATION_CEILING, EntitlementOracle,
    PAGE_DEPTH_MAX, PAGE_SIZE_MAX, PAGED_CEILING,
};
use crate::error::DirectPlusError;

/// Sort fields walked in turn when a result set is too large to page through.
pub const CAP_BUSTING_SORT_FIELDS: [&str; 6] = [
    "numberOfEmployees",
    "countryISOAlpha2Code",
    "primaryName",
    "isOutOfBusiness",
    "isBranch",
    "yearlyRevenue",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Empty,
    Simple,
    Paged,
    CapBusting,
    Split,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Simple => "simple",
            Self::Paged => "paged",
            Self::CapBusting => "cap-busting",
            Self::Split => "split",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestStatus {
    Empty,
    /// Fewer identifiers were collected than the provider reported matching.
    Partial,
    Complete,
}

impl HarvestStatus {
    fn of(collected: usize, matched: u64) -> Self {
        match (collected, matched) {
            (0, 0) => Self::Empty,
            (n, m) if n as u64 >= m => Self::Complete,
            _ => Self::Partial,
        }
    }

    fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Partial, _) | (_, Self::Partial) => Self::Partial,
            (Self::Complete, _) | (_, Self::Complete) => Self::Complete,
            _ => Self::Empty,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Partial => "partial",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub criteria_hash: String,
    pub matched: u64,
    pub strategy: Strategy,
    pub status: HarvestStatus,
    /// Remote searches issued for this harvest.
    pub searches: usize,
    pub ids: BTreeSet<String>,
}

/// Outcome of walking the pages of a single sort order.
enum PageWalk {
    Empty,
    Collected,
}

struct Harvest {
    matched: u64,
    strategy: Strategy,
    status: HarvestStatus,
    ids: BTreeSet<String>,
}

/// Picks and runs the retrieval strategy for a criteria set.
pub struct Harvester {
    executor: SearchExecutor,
    entitlements: Arc<dyn EntitlementOracle>,
    max_split_depth: usize,
}

impl Harvester {
    pub fn new(executor: SearchExecutor, entitlements: Arc<dyn EntitlementOracle>) -> Self {
        Self {
            executor,
            entitlements,
            max_split_depth: DEFAULT_MAX_SPLIT_DEPTH,
        }
    }

    pub fn with_max_split_depth(mut self, depth: usize) -> Self {
        self.max_split_depth = depth;
        self
    }

    pub fn executor(&self) -> &SearchExecutor {
        &self.executor
    }

    /// Collects every identifier the criteria match, choosing between a
    /// single page, paging, re-sorted walks and recursive splitting.
    pub async fn harvest(&self, criteria: &CriteriaSet) -> Result<HarvestReport, DirectPlusError> {
        let before = self.executor.issued();
        let harvest = self.harvest_at_depth(criteria, 0).await?;
        let report = HarvestReport {
            criteria_hash: criteria.hash(),
            matched: harvest.matched,
            strategy: harvest.strategy,
            status: harvest.status,
            searches: self.executor.issued() - before,
            ids: harvest.ids,
        };
        info!(
            hash = %report.criteria_hash,
            matched = report.matched,
            collected = report.ids.len(),
            strategy = report.strategy.as_str(),
            searches = report.searches,
            "Harvest finished"
        );
        Ok(report)
    }

    fn harvest_at_depth<'a>(
        &'a self,
        criteria: &'a CriteriaSet,
        depth: usize,
    ) -> BoxFuture<'a, Result<Harvest, DirectPlusError>> {
        Box::pin(async move {
            // Every strategy treats the first response as page 1.
            let criteria = &criteria.without(&[PAGE_NUMBER_KEY]);
            let initial = self.executor.search(criteria).await?;
            let matched = initial.candidates_matched_quantity;
            debug!(depth, matched, "Selecting harvest strategy");

            if matched == 0 {
                return Ok(Harvest {
                    matched,
                    strategy: Strategy::Empty,
                    status: HarvestStatus::Empty,
                    ids: BTreeSet::new(),
                });
            }
            if matched > ENUMERATION_CEILING {
                return self.split_harvest(criteria, matched, depth).await;
            }

            let (strategy, ids) = if matched <= u64::from(PAGE_SIZE_MAX) {
                (Strategy::Simple, initial.identifiers())
            } else if matched <= PAGED_CEILING {
                (Strategy::Paged, self.paged(criteria, &initial).await?)
            } else {
                if self.entitlements.is_entitled(BULK_OPERATION).await? {
                    warn!(
                        matched,
                        "Bulk resolution is not available; falling back to sort-order walks"
                    );
                }
                (Strategy::CapBusting, self.cap_busting(criteria, &initial).await?)
            };

            let status = HarvestStatus::of(ids.len(), matched);
            if status == HarvestStatus::Partial {
                warn!(
                    matched,
                    collected = ids.len(),
                    strategy = strategy.as_str(),
                    criteria = %criteria.summary(),
                    "Harvest collected fewer identifiers than matched"
                );
            }
            Ok(Harvest {
                matched,
                strategy,
                status,
                ids,
            })
        })
    }

    async fn paged(
        &self,
        criteria: &CriteriaSet,
        initial: &SearchResult,
    ) -> Result<BTreeSet<String>, DirectPlusError> {
        let base = initial.echoed_criteria(criteria)?;
        let pages = initial.page_count();
        if pages > u64::from(PAGE_DEPTH_MAX) {
            warn!(
                pages,
                depth = PAGE_DEPTH_MAX,
                "More pages than the provider serves; later results are unreachable"
            );
        }

        let mut ids = initial.identifiers();
        let last = pages.min(u64::from(PAGE_DEPTH_MAX)) as u32;
        for page in 2..=last {
            let result = self.executor.search(&base.with_page(page)).await?;
            if result.is_empty() {
                debug!(page, "Page reported no match; stopping");
                break;
            }
            ids.extend(result.identifiers());
        }
        Ok(ids)
    }

    async fn cap_busting(
        &self,
        criteria: &CriteriaSet,
        initial: &SearchResult,
    ) -> Result<BTreeSet<String>, DirectPlusError> {
        let base = initial.echoed_criteria(criteria)?;
        let matched = initial.candidates_matched_quantity;
        let last = initial.page_count().min(u64::from(PAGE_DEPTH_MAX)) as u32;
        let mut ids = initial.identifiers();

        'fields: for field in CAP_BUSTING_SORT_FIELDS {
            for direction in SortDirection::BOTH {
                if ids.len() as u64 >= matched {
                    break 'fields;
                }
                let sorted = base.with_sort(vec![SortDirective::new(field, direction)]);
                let before = ids.len();
                match self.walk(&sorted, last, &mut ids).await? {
                    PageWalk::Empty => {
                        debug!(field, "Sort field returned nothing; skipping its other direction");
                        continue 'fields;
                    }
                    PageWalk::Collected => debug!(
                        field,
                        direction = direction.as_str(),
                        added = ids.len() - before,
                        total = ids.len(),
                        "Sort-order walk finished"
                    ),
                }
            }
        }
        Ok(ids)
    }

    async fn walk(
        &self,
        criteria: &CriteriaSet,
        last: u32,
        ids: &mut BTreeSet<String>,
    ) -> Result<PageWalk, DirectPlusError> {
        for page in 1..=last {
            let result = self.executor.search(&criteria.with_page(page)).await?;
            if result.is_empty() {
                if page == 1 {
                    return Ok(PageWalk::Empty);
                }
                break;
            }
            ids.extend(result.identifiers());
        }
        Ok(PageWalk::Collected)
    }

    async fn split_harvest(
        &self,
        criteria: &CriteriaSet,
        matched: u64,
        depth: usize,
    ) -> Result<Harvest, DirectPlusError> {
        if depth >= self.max_split_depth {
            return Err(DirectPlusError::SplitDepthExceeded { depth, matched });
        }
        let partitions = split(criteria);
        if partitions.is_empty() {
            return Err(DirectPlusError::SplitExhausted {
                matched,
                criteria: criteria.summary(),
            });
        }
        info!(
            depth,
            matched,
            partitions = partitions.len(),
            "Matches exceed the enumeration ceiling; splitting criteria"
        );

        let mut ids = BTreeSet::new();
        let mut status = HarvestStatus::Empty;
        for partition in &partitions {
            let part = self.harvest_at_depth(partition, depth + 1).await?;
            status = status.combine(part.status);
            ids.extend(part.ids);
        }
        Ok(Harvest {
            matched,
            strategy: Strategy::Split,
            status,
            ids,
        })
    }
}
