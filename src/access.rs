//! Account checks against the entitlements document and per-operation
//! entitlement answers.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::endpoints::EndpointRegistry;
use crate::error::DirectPlusError;
use crate::search::{ApiClient, EntitlementOracle};

pub const FLAGS_ENV: &str = "DIRECTPLUS_FLAGS";
const ENTITLEMENTS_OPERATION: &str = "entitlements";
const PRODUCTION_KEY: &str = "PRODUCTION";

/// Opt-ins that relax the account checks, parsed from `DIRECTPLUS_FLAGS`.
///
/// Names other than the fixed switches admit an API key type of that name,
/// e.g. `DEVELOPMENT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessFlags {
    pub allow_internal: bool,
    pub disallow_external: bool,
    pub allow_trial: bool,
    pub allow_inactive: bool,
    pub skip_entitlement_check: bool,
    pub key_types: BTreeSet<String>,
}

impl AccessFlags {
    pub fn from_env() -> Result<Self, DirectPlusError> {
        match std::env::var(FLAGS_ENV) {
            Ok(raw) => raw.parse(),
            Err(_) => Ok(Self::default()),
        }
    }

    fn allows_key_type(&self, key_type: &str) -> bool {
        let key_type = key_type.trim().to_ascii_uppercase();
        key_type == PRODUCTION_KEY || self.key_types.contains(&key_type)
    }
}

impl FromStr for AccessFlags {
    type Err = DirectPlusError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut flags = Self::default();
        for name in raw
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            match name.to_ascii_uppercase().as_str() {
                "ALLOW_INTERNAL" => flags.allow_internal = true,
                "DISALLOW_EXTERNAL" => flags.disallow_external = true,
                "ALLOW_TRIAL" => flags.allow_trial = true,
                "ALLOW_INACTIVE" => flags.allow_inactive = true,
                "SKIP_ENTITLEMENT_CHECK" => flags.skip_entitlement_check = true,
                other if other.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
                    flags.key_types.insert(other.to_string());
                }
                other => {
                    return Err(DirectPlusError::InvalidArgument(format!(
                        "{FLAGS_ENV} contains an invalid flag: {other}"
                    )));
                }
            }
        }
        Ok(flags)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementsDocument {
    #[serde(default)]
    pub subscriber: Subscriber,
    #[serde(default)]
    pub product: Product,
    #[serde(default)]
    pub api_key: ApiKey,
    #[serde(default)]
    pub entitlements: Vec<Entitlement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub subscriber_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub contract_type: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entitlement {
    #[serde(rename = "entitlementID")]
    pub entitlement_id: String,
    #[serde(default)]
    pub levels: Vec<Value>,
}

impl EntitlementsDocument {
    /// Entitlements that grant at least one level.
    pub fn granted(&self) -> impl Iterator<Item = &Entitlement> {
        self.entitlements.iter().filter(|e| !e.levels.is_empty())
    }

    pub fn grants(&self, operation: &str) -> bool {
        self.granted().any(|e| e.entitlement_id == operation)
    }
}

fn denied(reason: impl Into<String>, flag: &str) -> DirectPlusError {
    DirectPlusError::AccessDenied {
        reason: reason.into(),
        suggestion: format!("export {FLAGS_ENV}={flag}"),
    }
}

/// Rejects accounts the flags do not opt into.
pub fn validate_account(
    doc: &EntitlementsDocument,
    flags: &AccessFlags,
) -> Result<(), DirectPlusError> {
    match doc.subscriber.subscriber_type.as_deref() {
        Some("Internal") if !flags.allow_internal => {
            return Err(denied("Internal subscribers are not allowed.", "ALLOW_INTERNAL"));
        }
        Some("External") if flags.disallow_external => {
            return Err(DirectPlusError::AccessDenied {
                reason: "External subscribers are disallowed.".into(),
                suggestion: format!("remove DISALLOW_EXTERNAL from {FLAGS_ENV}"),
            });
        }
        _ => {}
    }

    if doc
        .product
        .contract_type
        .as_deref()
        .is_some_and(|contract| contract.starts_with("Trial"))
        && !flags.allow_trial
    {
        return Err(denied("Trial contracts are not allowed.", "ALLOW_TRIAL"));
    }

    if doc.product.status.as_deref() != Some("Active") && !flags.allow_inactive {
        return Err(denied("Product must be active.", "ALLOW_INACTIVE"));
    }

    let key_type = doc.api_key.key_type.as_deref().unwrap_or_default();
    if !flags.allows_key_type(key_type) {
        let flag = key_type.trim().to_ascii_uppercase();
        return Err(denied(
            format!("Key type '{key_type}' needs a matching flag."),
            if flag.is_empty() { "<KEY_TYPE>" } else { flag.as_str() },
        ));
    }
    Ok(())
}

/// Answers entitlement questions from the account's entitlements document,
/// fetched and validated once on first use.
pub struct AccessManager {
    client: Arc<dyn ApiClient>,
    registry: Arc<EndpointRegistry>,
    flags: AccessFlags,
    document: OnceCell<EntitlementsDocument>,
}

impl AccessManager {
    pub fn new(client: Arc<dyn ApiClient>, registry: Arc<EndpointRegistry>, flags: AccessFlags) -> Self {
        Self {
            client,
            registry,
            flags,
            document: OnceCell::new(),
        }
    }

    pub fn flags(&self) -> &AccessFlags {
        &self.flags
    }

    /// The validated entitlements document.
    pub async fn entitlements(&self) -> Result<&EntitlementsDocument, DirectPlusError> {
        self.document
            .get_or_try_init(|| async {
                let body = self
                    .client
                    .execute(ENTITLEMENTS_OPERATION, &Map::new())
                    .await
                    .map_err(|err| {
                        if err.is_authorization() {
                            denied(
                                "The key is not entitled to the entitlements endpoint.",
                                "SKIP_ENTITLEMENT_CHECK",
                            )
                        } else {
                            err
                        }
                    })?;
                let doc: EntitlementsDocument =
                    serde_json::from_value(body).map_err(|source| DirectPlusError::ApiJson {
                        api: ENTITLEMENTS_OPERATION.to_string(),
                        source,
                    })?;
                validate_account(&doc, &self.flags)?;
                info!(granted = doc.granted().count(), "Account validated");
                Ok(doc)
            })
            .await
    }

    /// Validates the account unless checks are skipped.
    pub async fn ensure_account(&self) -> Result<(), DirectPlusError> {
        if self.flags.skip_entitlement_check {
            return Ok(());
        }
        self.entitlements().await.map(|_| ())
    }
}

#[async_trait]
impl EntitlementOracle for AccessManager {
    async fn is_entitled(&self, operation: &str) -> Result<bool, DirectPlusError> {
        if !self.registry.contains_id(operation) {
            return Err(DirectPlusError::EndpointNotFound {
                id: operation.to_string(),
            });
        }
        if self.flags.skip_entitlement_check {
            debug!(operation, "Entitlement check skipped");
            return Ok(false);
        }
        Ok(self.entitlements().await?.grants(operation))
    }
}
