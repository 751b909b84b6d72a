//! The `DirectPlus` facade: authenticated operation calls gated by the
//! account checks, plus the search manager.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::access::{AccessFlags, AccessManager, EntitlementsDocument};
use crate::blocks::{self, BlockRequest};
use crate::endpoints::EndpointRegistry;
use crate::error::DirectPlusError;
use crate::search::{
    ApiClient, DEFAULT_MAX_SPLIT_DEPTH, Harvester, SearchExecutor, SearchManager,
};
use crate::sources::directplus::DirectPlusClient;
use crate::sources::session::{Credentials, TokenSession};

const DATA_BLOCKS_OPERATION: &str = "dataBlocks";
const FAMILY_TREE_FULL_OPERATION: &str = "familyTreeFull";
const FAMILY_TREE_UPWARD_OPERATION: &str = "familyTreeUpward";
const REFDATA_OPERATION: &str = "refdataCodes";
const MATCH_OPERATION: &str = "IDRCleanseMatch";
const DEFAULT_MATCH_CONFIDENCE: u8 = 8;

// Validates the account once before the first request goes out.
struct CheckedClient {
    client: Arc<DirectPlusClient>,
    access: Arc<AccessManager>,
}

#[async_trait]
impl ApiClient for CheckedClient {
    async fn execute(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DirectPlusError> {
        self.access.ensure_account().await?;
        self.client.call(operation, params).await
    }
}

pub struct DirectPlus {
    api: Arc<CheckedClient>,
    registry: Arc<EndpointRegistry>,
    max_split_depth: usize,
}

impl DirectPlus {
    /// Builds a facade from `DIRECTPLUS_*` environment variables.
    pub fn from_env() -> Result<Self, DirectPlusError> {
        let registry = Arc::new(EndpointRegistry::from_env()?);
        let session = TokenSession::new(Credentials::from_env()?)?;
        Self::new(registry, session, AccessFlags::from_env()?)
    }

    pub fn new(
        registry: Arc<EndpointRegistry>,
        session: TokenSession,
        flags: AccessFlags,
    ) -> Result<Self, DirectPlusError> {
        let client = Arc::new(DirectPlusClient::new(registry.clone(), Arc::new(session))?);
        let access = Arc::new(AccessManager::new(client.clone(), registry.clone(), flags));
        Ok(Self {
            api: Arc::new(CheckedClient { client, access }),
            registry,
            max_split_depth: DEFAULT_MAX_SPLIT_DEPTH,
        })
    }

    pub fn with_max_split_depth(mut self, depth: usize) -> Self {
        self.max_split_depth = depth;
        self
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn access(&self) -> &AccessManager {
        &self.api.access
    }

    pub async fn call(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DirectPlusError> {
        self.api.execute(operation, params).await
    }

    /// Fetches data blocks for one D-U-N-S number.
    pub async fn enrich(
        &self,
        duns: &str,
        requests: &[BlockRequest],
    ) -> Result<Value, DirectPlusError> {
        if requests.is_empty() {
            return Err(DirectPlusError::InvalidArgument(
                "At least one data block is required.".into(),
            ));
        }
        let block_ids = blocks::block_ids(requests);
        debug!(duns, block_ids = %block_ids, "Enriching");
        self.call(
            DATA_BLOCKS_OPERATION,
            &params([("dunsNumber", json!(duns)), ("blockIDs", json!(block_ids))]),
        )
        .await
    }

    pub async fn family_tree_full(
        &self,
        duns: &str,
        page_number: Option<u32>,
    ) -> Result<Value, DirectPlusError> {
        let mut fields = params([("duns", json!(duns))]);
        if let Some(page) = page_number {
            fields.insert("pageNumber".into(), json!(page));
        }
        self.call(FAMILY_TREE_FULL_OPERATION, &fields).await
    }

    pub async fn family_tree_upward(&self, duns: &str) -> Result<Value, DirectPlusError> {
        self.call(FAMILY_TREE_UPWARD_OPERATION, &params([("duns", json!(duns))]))
            .await
    }

    /// Reference codes for one category id.
    pub async fn category_codes(&self, category: u32) -> Result<Value, DirectPlusError> {
        self.call(REFDATA_OPERATION, &params([("id", json!(category))]))
            .await
    }

    /// Identity resolution; the confidence floor defaults to 8.
    pub async fn cleanse_match(
        &self,
        mut fields: Map<String, Value>,
    ) -> Result<Value, DirectPlusError> {
        fields
            .entry("confidenceLowerLevelThresholdValue")
            .or_insert_with(|| json!(DEFAULT_MATCH_CONFIDENCE));
        self.call(MATCH_OPERATION, &fields).await
    }

    /// The account's validated entitlements document.
    pub async fn entitlements(&self) -> Result<&EntitlementsDocument, DirectPlusError> {
        self.api.access.entitlements().await
    }

    /// A search manager sharing this facade's session and entitlements.
    pub fn search_manager(&self) -> SearchManager {
        let api: Arc<dyn ApiClient> = self.api.clone();
        let harvester = Harvester::new(SearchExecutor::new(api), self.api.access.clone())
            .with_max_split_depth(self.max_split_depth);
        SearchManager::with_harvester(harvester)
    }
}

fn params<const N: usize>(fields: [(&str, Value); N]) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::parse_block;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn facade(base: &str, flags: &str) -> DirectPlus {
        let credentials = Credentials::new(
            "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            "fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210",
        )
        .unwrap();
        DirectPlus::new(
            Arc::new(EndpointRegistry::bundled().unwrap().with_base(base)),
            TokenSession::with_base(credentials, base).unwrap(),
            flags.parse().unwrap(),
        )
        .unwrap()
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v2/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok", "expiresIn": 86400})),
            )
            .mount(server)
            .await;
    }

    fn entitlements_body(status: &str) -> Value {
        json!({
            "subscriber": {"subscriberType": "External"},
            "product": {"contractType": "Standard", "status": status},
            "apiKey": {"keyType": "Production"},
            "entitlements": [{"entitlementID": "dataBlocks", "levels": ["L1"]}]
        })
    }

    #[tokio::test]
    async fn account_is_validated_once_before_calls() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/entitlements"))
            .respond_with(ResponseTemplate::new(200).set_body_json(entitlements_body("Active")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/data/duns/804735132"))
            .and(query_param("blockIDs", "companyinfo_L2_v1,paymentinsight_L1_v1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"organization": {"duns": "804735132"}})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let dp = facade(&server.uri(), "");
        let requests = vec![
            parse_block("companyinfo:2").unwrap(),
            parse_block("paymentinsight").unwrap(),
        ];
        for _ in 0..2 {
            let body = dp.enrich("804735132", &requests).await.unwrap();
            assert_eq!(body["organization"]["duns"], "804735132");
        }
    }

    #[tokio::test]
    async fn inactive_products_are_refused_before_the_call() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/entitlements"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(entitlements_body("Suspended")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/familyTreeUpward/804735132"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let err = facade(&server.uri(), "")
            .family_tree_upward("804735132")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectPlusError::AccessDenied { .. }));
        assert!(err.to_string().contains("ALLOW_INACTIVE"));
    }

    #[tokio::test]
    async fn cleanse_match_defaults_confidence_floor() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/match/cleanseMatch"))
            .and(query_param("name", "Gorman Manufacturing"))
            .and(query_param("confidenceLowerLevelThresholdValue", "8"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"candidatesMatchedQuantity": 1})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dp = facade(&server.uri(), "SKIP_ENTITLEMENT_CHECK");
        let body = dp
            .cleanse_match(params([
                ("name", json!("Gorman Manufacturing")),
                ("countryISOAlpha2Code", json!("US")),
            ]))
            .await
            .unwrap();
        assert_eq!(body["candidatesMatchedQuantity"], 1);
    }

    #[tokio::test]
    async fn category_codes_and_family_tree_pages() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/referenceData/category"))
            .and(query_param("id", "3599"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"codeTables": []})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/familyTree/804735132"))
            .and(query_param("pageNumber", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"familyTreeMembers": []})))
            .expect(1)
            .mount(&server)
            .await;

        let dp = facade(&server.uri(), "SKIP_ENTITLEMENT_CHECK");
        dp.category_codes(3599).await.unwrap();
        dp.family_tree_full("804735132", Some(2)).await.unwrap();
    }

    #[tokio::test]
    async fn enrich_requires_blocks() {
        let dp = facade("http://127.0.0.1:9", "SKIP_ENTITLEMENT_CHECK");
        let err = dp.enrich("804735132", &[]).await.unwrap_err();
        assert!(matches!(err, DirectPlusError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn search_manager_counts_through_the_session() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/search/criteria"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidatesMatchedQuantity": 4321,
                "candidatesReturnedQuantity": 0,
                "searchCandidates": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = facade(&server.uri(), "SKIP_ENTITLEMENT_CHECK").search_manager();
        let count = manager
            .get_count(params([("countryISOAlpha2Code", json!("SE"))]))
            .await
            .unwrap();
        assert_eq!(count, 4321);
    }
}
