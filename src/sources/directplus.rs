use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value};
use tracing::debug;

use super::session::TokenSession;
use crate::endpoints::EndpointRegistry;
use crate::error::DirectPlusError;
use crate::search::ApiClient;

/// Provider codes meaning the requested D-U-N-S number does not exist.
const DUNS_NOT_FOUND: [(u16, &str); 2] = [(404, "10001"), (410, "40002")];
const PAYLOAD_FAULT_PREFIX: &str = "Error parsing request payload";

/// Sends named Direct+ operations with a bearer token from the session.
pub struct DirectPlusClient {
    client: reqwest_middleware::ClientWithMiddleware,
    registry: Arc<EndpointRegistry>,
    session: Arc<TokenSession>,
}

impl DirectPlusClient {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        session: Arc<TokenSession>,
    ) -> Result<Self, DirectPlusError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            registry,
            session,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: &str) -> Result<Self, DirectPlusError> {
        let credentials = super::session::Credentials::new(
            "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            "fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210",
        )?;
        Self::new(
            Arc::new(EndpointRegistry::bundled()?.with_base(base)),
            Arc::new(TokenSession::with_base(credentials, base)?),
        )
    }

    /// Validates `params` for `operation`, sends the request and returns the
    /// decoded JSON body.
    pub async fn call(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DirectPlusError> {
        let endpoint = self.registry.get(operation)?;
        let bound = endpoint.bind(params)?;
        let api = endpoint.id.as_str();
        let token = self.session.bearer().await?;

        debug!(operation = api, method = %bound.method, url = %bound.url, "Calling Direct+");
        let mut req = self
            .client
            .request(bound.method.clone(), bound.url.clone())
            .bearer_auth(token)
            .header(ACCEPT, "application/json;charset=utf-8");
        if !bound.query.is_empty() {
            req = req.query(&bound.query);
        }
        for (name, value) in &bound.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &bound.body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, api).await?;
        let duns = duns_param(params);
        if !status.is_success() {
            return Err(classify_error(api, status.as_u16(), &bytes, duns));
        }

        crate::sources::ensure_json_content_type(api, content_type.as_ref(), &bytes)?;
        let body: Value = serde_json::from_slice(&bytes).map_err(|source| {
            DirectPlusError::ApiJson {
                api: api.to_string(),
                source,
            }
        })?;
        if body.get("error").is_some_and(|error| !error.is_null()) {
            return Err(classify_error(api, status.as_u16(), &bytes, duns));
        }
        Ok(body)
    }
}

#[async_trait]
impl ApiClient for DirectPlusClient {
    async fn execute(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DirectPlusError> {
        self.call(operation, params).await
    }
}

fn duns_param(params: &Map<String, Value>) -> Option<&str> {
    ["dunsNumber", "duns"]
        .iter()
        .find_map(|key| params.get(*key).and_then(Value::as_str))
}

/// Maps a failed Direct+ response to an error, using the provider's
/// `error.errorCode`/`error.errorMessage` when the body carries them.
pub(crate) fn classify_error(
    operation: &str,
    status: u16,
    body: &[u8],
    duns: Option<&str>,
) -> DirectPlusError {
    let parsed = serde_json::from_slice::<Value>(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let code = error
        .and_then(|e| e.get("errorCode"))
        .and_then(|c| match c {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    let message = error
        .and_then(|e| e.get("errorMessage"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let excerpt = crate::sources::body_excerpt(body);
            if excerpt.is_empty() {
                format!("HTTP {status}")
            } else {
                excerpt
            }
        });

    if matches!(status, 401 | 403) {
        return DirectPlusError::Authorization(format!("{operation}: {message}"));
    }

    if let Some(code) = code.as_deref()
        && DUNS_NOT_FOUND.contains(&(status, code))
    {
        return DirectPlusError::NotFound {
            entity: "DUNS".into(),
            id: duns.unwrap_or("-").to_string(),
            suggestion: format!(
                "{message}\n\nTry: directplus search hits --criteria '{{\"primaryName\": \"...\"}}'"
            ),
        };
    }

    let fault = error
        .and_then(|e| e.pointer("/fault/faultstring"))
        .and_then(Value::as_str);
    if status == 500 && fault.is_some_and(|f| f.starts_with(PAYLOAD_FAULT_PREFIX)) {
        return DirectPlusError::Remote {
            operation: operation.to_string(),
            status: 400,
            code,
            message: "Request payload is malformed or empty.".into(),
        };
    }

    DirectPlusError::Remote {
        operation: operation.to_string(),
        status,
        code,
        message: fault.map(str::to_string).unwrap_or(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    async fn server_with_token() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "test-token", "expiresIn": 86400})),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn search_posts_json_body_with_bearer_token() {
        let server = server_with_token().await;
        Mock::given(method("POST"))
            .and(path("/v1/search/criteria"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(json!({"primaryName": "Gorman", "pageSize": 50})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidatesMatchedQuantity": 1,
                "searchCandidates": [{"organization": {"duns": "804735132"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DirectPlusClient::new_for_test(&server.uri()).unwrap();
        let body = client
            .call("searchCriteria", &map(json!({"primaryName": "Gorman", "pageSize": 50})))
            .await
            .expect("search");
        assert_eq!(body["candidatesMatchedQuantity"], 1);
    }

    #[tokio::test]
    async fn data_blocks_use_path_and_query_parameters() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/v1/data/duns/804735132"))
            .and(query_param("blockIDs", "companyinfo_L2_v1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"organization": {"duns": "804735132"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = DirectPlusClient::new_for_test(&server.uri()).unwrap();
        let body = client
            .call(
                "dataBlocks",
                &map(json!({"dunsNumber": "804735132", "blockIDs": "companyinfo_L2_v1"})),
            )
            .await
            .expect("data blocks");
        assert_eq!(body["organization"]["duns"], "804735132");
    }

    #[tokio::test]
    async fn no_match_keeps_the_provider_code() {
        let server = server_with_token().await;
        Mock::given(method("POST"))
            .and(path("/v1/search/criteria"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"errorCode": "21501", "errorMessage": "No Match found for the given input criteria"}
            })))
            .mount(&server)
            .await;

        let client = DirectPlusClient::new_for_test(&server.uri()).unwrap();
        let err = client
            .call("searchCriteria", &map(json!({"primaryName": "Nobody"})))
            .await
            .unwrap_err();
        assert!(err.is_no_match());
    }

    #[tokio::test]
    async fn unauthorized_responses_are_authorization_errors() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/v1/entitlements"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"errorCode": "00004", "errorMessage": "Access token is invalid"}
            })))
            .mount(&server)
            .await;

        let client = DirectPlusClient::new_for_test(&server.uri()).unwrap();
        let err = client.call("entitlements", &Map::new()).await.unwrap_err();
        assert!(matches!(err, DirectPlusError::Authorization(_)));
    }

    #[tokio::test]
    async fn unknown_duns_is_not_found() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/v1/data/duns/000000001"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"errorCode": "10001", "errorMessage": "No match found for the requested Duns number."}
            })))
            .mount(&server)
            .await;

        let client = DirectPlusClient::new_for_test(&server.uri()).unwrap();
        let err = client
            .call(
                "dataBlocks",
                &map(json!({"dunsNumber": "000000001", "blockIDs": "companyinfo_L1_v1"})),
            )
            .await
            .unwrap_err();
        match err {
            DirectPlusError::NotFound { entity, id, .. } => {
                assert_eq!(entity, "DUNS");
                assert_eq!(id, "000000001");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn invalid_parameters_never_reach_the_network() {
        let server = server_with_token().await;
        Mock::given(method("POST"))
            .and(path("/v1/search/criteria"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let client = DirectPlusClient::new_for_test(&server.uri()).unwrap();
        let err = client
            .call("searchCriteria", &map(json!({"pageSize": 500})))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectPlusError::InvalidArgument(_)));

        let err = client.call("companyInfo", &Map::new()).await.unwrap_err();
        assert!(matches!(err, DirectPlusError::EndpointNotFound { .. }));
    }

    #[tokio::test]
    async fn error_objects_in_successful_responses_are_errors() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/v1/referenceData/category"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"errorCode": "30001", "errorMessage": "Unknown category"}
            })))
            .mount(&server)
            .await;

        let client = DirectPlusClient::new_for_test(&server.uri()).unwrap();
        let err = client
            .call("refdataCodes", &map(json!({"id": 999999})))
            .await
            .unwrap_err();
        assert_eq!(err.provider_code(), Some("30001"));
    }

    #[test]
    fn payload_parsing_faults_are_reclassified_as_bad_requests() {
        let body = json!({"error": {"fault": {"faultstring": "Error parsing request payload: unexpected EOF"}}});
        let err = classify_error("searchCriteria", 500, body.to_string().as_bytes(), None);
        assert!(err.is_payload_error());
        assert!(err.to_string().contains("malformed or empty"));

        let other = json!({"error": {"fault": {"faultstring": "Gateway timeout"}}});
        let err = classify_error("searchCriteria", 500, other.to_string().as_bytes(), None);
        assert!(matches!(err, DirectPlusError::Remote { status: 500, .. }));
        assert!(err.to_string().contains("Gateway timeout"));
    }

    #[test]
    fn gone_duns_is_not_found_and_plain_bodies_are_excerpted() {
        let body = json!({"error": {"errorCode": "40002", "errorMessage": "Duns has been deleted"}});
        let err = classify_error("dataBlocks", 410, body.to_string().as_bytes(), Some("804735132"));
        assert!(err.to_string().contains("DUNS '804735132' not found"));

        let err = classify_error("dataBlocks", 502, b"Bad gateway", None);
        assert!(err.to_string().contains("Bad gateway"));
        assert_eq!(err.provider_code(), None);
    }
}
