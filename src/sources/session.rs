use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::DirectPlusError;

pub(crate) const KEY_ENV: &str = "DIRECTPLUS_KEY";
pub(crate) const SECRET_ENV: &str = "DIRECTPLUS_SECRET";
const TOKEN_API: &str = "token";
const CREDENTIAL_LEN: usize = 64;
/// Tokens are renewed this long before the provider says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Consumer key and secret issued for a Direct+ account.
#[derive(Clone)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    pub fn new(key: &str, secret: &str) -> Result<Self, DirectPlusError> {
        let key = key.trim();
        let secret = secret.trim();
        validate_part("key", key)?;
        validate_part("secret", secret)?;
        Ok(Self {
            key: key.to_string(),
            secret: secret.to_string(),
        })
    }

    pub fn from_env() -> Result<Self, DirectPlusError> {
        let key = read_env(KEY_ENV)?;
        let secret = read_env(SECRET_ENV)?;
        Self::new(&key, &secret)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn read_env(name: &str) -> Result<String, DirectPlusError> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DirectPlusError::CredentialsRequired {
            env_var: name.to_string(),
        })
}

fn validate_part(name: &str, value: &str) -> Result<(), DirectPlusError> {
    if value.len() != CREDENTIAL_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DirectPlusError::InvalidCredentials(format!(
            "{name} must be {CREDENTIAL_LEN} hexadecimal characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(rename = "expiresIn")]
    expires_in: u64,
}

struct CachedToken {
    value: String,
    renew_at: Instant,
}

/// Client-credentials token holder; requests a new bearer token when the
/// cached one is about to expire.
pub struct TokenSession {
    client: reqwest_middleware::ClientWithMiddleware,
    token_url: String,
    credentials: Credentials,
    token: Mutex<Option<CachedToken>>,
}

impl TokenSession {
    pub fn new(credentials: Credentials) -> Result<Self, DirectPlusError> {
        let base = crate::sources::env_base(
            crate::sources::DIRECTPLUS_BASE,
            crate::sources::DIRECTPLUS_BASE_ENV,
        );
        Self::with_base(credentials, &base)
    }

    pub(crate) fn with_base(credentials: Credentials, base: &str) -> Result<Self, DirectPlusError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            token_url: format!("{}/v2/token", base.trim_end_matches('/')),
            credentials,
            token: Mutex::new(None),
        })
    }

    /// A valid bearer token, fetching one when none is cached or it expired.
    pub async fn bearer(&self) -> Result<String, DirectPlusError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref().filter(|t| Instant::now() < t.renew_at) {
            return Ok(token.value.clone());
        }

        let fresh = self.request_token().await?;
        let value = fresh.access_token.clone();
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(expires_in = fresh.expires_in, "Access token acquired");
        *slot = Some(CachedToken {
            value: fresh.access_token,
            renew_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn request_token(&self) -> Result<TokenResponse, DirectPlusError> {
        debug!(url = %self.token_url, "Requesting access token");
        let resp = self
            .client
            .post(&self.token_url)
            .basic_auth(self.credentials.key(), Some(&self.credentials.secret))
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .json(&serde_json::json!({"grant_type": "client_credentials"}))
            .send()
            .await?;
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, TOKEN_API).await?;
        if !status.is_success() {
            return Err(super::directplus::classify_error(
                TOKEN_API,
                status.as_u16(),
                &bytes,
                None,
            ));
        }
        serde_json::from_slice(&bytes).map_err(|source| DirectPlusError::ApiJson {
            api: TOKEN_API.to_string(),
            source,
        })
    }
}
