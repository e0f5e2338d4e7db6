use thiserror::Error;

/// Classification of an HTTP error returned by the upstream or destination API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// 400, 409, 422 and other client-side rejections
    BadRequest,
    /// 401, missing or invalid API key
    Authentication,
    /// 403, access to the resource is restricted
    Forbidden,
    /// 404
    NotFound,
    /// 429
    RateLimit,
    /// 5xx
    ServerError,
    /// Anything else
    Unknown,
}

impl ApiErrorKind {
    /// Maps an HTTP status code to an error kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Authentication,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            429 => Self::RateLimit,
            500..=599 => Self::ServerError,
            400..=499 => Self::BadRequest,
            _ => Self::Unknown,
        }
    }
}

/// Structured details of a failed API call.
#[derive(Debug, Clone)]
pub struct ApiErrorDetails {
    /// The error category
    pub kind: ApiErrorKind,
    /// Response body or reason phrase, truncated
    pub message: String,
    /// HTTP status code
    pub status_code: u16,
    /// The endpoint that failed
    pub endpoint: String,
}

impl ApiErrorDetails {
    /// Create details from a status code, classifying the kind automatically.
    pub fn new(status_code: u16, endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() > 300 {
            let cut = (0..=300).rev().find(|i| message.is_char_boundary(*i)).unwrap_or(0);
            message.truncate(cut);
            message.push_str("...");
        }
        Self {
            kind: ApiErrorKind::from_status(status_code),
            message,
            status_code,
            endpoint: endpoint.into(),
        }
    }
}

impl std::fmt::Display for ApiErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {} from {}", self.status_code, self.endpoint)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Application-wide error type.
///
/// Collaborator calls always return `Result<T, AppError>`: an empty result means
/// "nothing there", an `Err` means the call failed. The two are never conflated.
///
/// # Examples
///
/// ```
/// use odsync_core::error::AppError;
///
/// let err = AppError::MassDeletion { count: 150, threshold: 100 };
/// assert!(err.is_fatal());
/// assert!(!err.is_retryable());
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// An API answered with a non-success status.
    #[error("API error: {0}")]
    Api(ApiErrorDetails),

    /// The request could not be sent or the connection dropped.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The request exceeded the per-call timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Retries were exhausted on 429 responses.
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// Other HTTP client failures (body decoding, request building).
    #[error("API Client error: {0}")]
    ClientError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The upstream facet response cannot be used to derive a topic set.
    #[error("Malformed upstream response: {0}")]
    MalformedUpstream(String),

    /// The plan would delete an implausible number of datasets and nothing else.
    #[error(
        "Refusing to delete {count} datasets with nothing to add or update (threshold {threshold})"
    )]
    MassDeletion { count: usize, threshold: usize },

    /// A destination record referenced by the plan is missing.
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// The description template failed to compile or render.
    #[error("Template error: {0}")]
    TemplateError(String),

    /// Configuration file or value is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for cases without a dedicated variant.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if the call that produced this error may succeed when repeated.
    ///
    /// Network failures, timeouts, 429 and 5xx responses are transient; any other
    /// 4xx response is surfaced immediately.
    ///
    /// ```
    /// use odsync_core::error::{ApiErrorDetails, AppError};
    ///
    /// let server = AppError::Api(ApiErrorDetails::new(503, "/datasets/", ""));
    /// assert!(server.is_retryable());
    ///
    /// let missing = AppError::Api(ApiErrorDetails::new(404, "/datasets/x/", ""));
    /// assert!(!missing.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::Api(details) => matches!(
                details.kind,
                ApiErrorKind::RateLimit | ApiErrorKind::ServerError
            ),
            _ => false,
        }
    }

    /// Returns true if this error must abort the whole run before anything is mutated.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::MassDeletion { .. } | AppError::MalformedUpstream(_) | AppError::ConfigError(_)
        )
    }

    /// Returns true for an HTTP 403 response.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AppError::Api(details) if details.kind == ApiErrorKind::Forbidden)
    }

    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Api(details) => match details.kind {
                ApiErrorKind::Authentication => format!(
                    "The catalog rejected the API key ({}).\n   Check your ODP_API_KEY environment variable.",
                    details.endpoint
                ),
                ApiErrorKind::RateLimit => {
                    "The remote API is rate limiting us.\n   Lower the throttle budget and try again."
                        .to_string()
                }
                ApiErrorKind::ServerError => format!(
                    "Remote server error (HTTP {}).\n   Please try again later.",
                    details.status_code
                ),
                _ => format!("API error: {}", details),
            },
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection and proxy settings.", msg)
            }
            AppError::Timeout(secs) => format!(
                "Request timed out after {} seconds.\n   The server may be overloaded. Try again later.",
                secs
            ),
            AppError::MassDeletion { count, threshold } => format!(
                "Too many datasets to be deleted ({} > {}), stopping there.\n   The upstream response is probably incomplete; nothing was changed.",
                count, threshold
            ),
            AppError::MalformedUpstream(msg) => format!(
                "The upstream facet tree is unusable: {}\n   Check DOTSTAT_MAIN_FACET and DOTSTAT_DATASOURCE_ID.",
                msg
            ),
            AppError::ConfigError(msg) => {
                format!("Configuration error: {}\n   Check your settings file.", msg)
            }
            _ => self.to_string(),
        }
    }
}
