/// Provider error code for "no candidates matched the inquiry".
pub const NO_MATCH_CODE: &str = "21501";

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum DirectPlusError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    #[error("API error from {api}: {message}")]
    Api { api: String, message: String },

    #[error("API JSON error from {api}: {source}")]
    ApiJson {
        api: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "Remote error from {operation} (HTTP {status}, code {}): {message}",
        .code.as_deref().unwrap_or("-")
    )]
    Remote {
        operation: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("{entity} '{id}' not found.\n\n{suggestion}")]
    NotFound {
        entity: String,
        id: String,
        suggestion: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "Credentials required: set {env_var}.\n\nTo set:\n  export {env_var}=<64 hex characters>"
    )]
    CredentialsRequired { env_var: String },

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Authorization denied: {0}")]
    Authorization(String),

    #[error("Access denied: {reason}\n\nTry: {suggestion}")]
    AccessDenied { reason: String, suggestion: String },

    #[error("Endpoint '{id}' does not exist.")]
    EndpointNotFound { id: String },

    #[error("Specification error: {0}")]
    Specification(String),

    #[error("Search configuration error: {0}")]
    SearchConfiguration(String),

    #[error("Search failed for criteria {criteria}: {source}")]
    SearchFailure {
        criteria: String,
        #[source]
        source: Box<DirectPlusError>,
    },

    #[error(
        "{matched} matches exceed the enumeration ceiling and criteria {criteria} have no splittable field left"
    )]
    SplitExhausted { matched: u64, criteria: String },

    #[error("Criteria split depth {depth} reached with {matched} matches still above the ceiling")]
    SplitDepthExceeded { depth: usize, matched: u64 },

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DirectPlusError {
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            Self::Remote { code, .. } => code.as_deref(),
            Self::SearchFailure { source, .. } => source.provider_code(),
            _ => None,
        }
    }

    pub fn is_no_match(&self) -> bool {
        self.provider_code() == Some(NO_MATCH_CODE)
    }

    /// The provider rejected the request body or query as malformed.
    pub fn is_payload_error(&self) -> bool {
        matches!(self, Self::Remote { status: 400, .. })
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_) | Self::AccessDenied { .. })
    }
}
