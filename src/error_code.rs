//! Standard provider error codes.
//!
//! Providers report failures in many shapes: AWS-style exception names
//! (`ThrottlingException`), OpenAI-style codes (`rate_limit_exceeded`) or a bare
//! HTTP status. This module folds all of them into one [`StandardErrorCode`] so the
//! retry policy can decide without knowing which provider produced the error.
//!
//! | Prefix | Category    | Retried by default |
//! |--------|-------------|--------------------|
//! | E1xxx  | client      | no                 |
//! | E2xxx  | rate        | rate limits only   |
//! | E3xxx  | server      | yes                |
//! | E9xxx  | unknown     | no                 |
//!
//! ```rust
//! use llm_exec::error_code::StandardErrorCode;
//!
//! let code = StandardErrorCode::from_provider_code("ThrottlingException").unwrap();
//! assert_eq!(code, StandardErrorCode::RateLimited);
//! assert!(code.retryable());
//! ```

use std::fmt;

/// Canonical classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardErrorCode {
    /// E1001: Malformed request, invalid parameters, or missing required fields
    InvalidRequest,
    /// E1002: Invalid, expired, or missing API key
    Authentication,
    /// E1003: Valid credentials but insufficient permissions
    PermissionDenied,
    /// E1004: Requested model or endpoint does not exist
    NotFound,
    /// E1005: Input exceeds context window or payload limit
    RequestTooLarge,
    /// E2001: Request rate limit exceeded (throttling, too many requests)
    RateLimited,
    /// E2002: Account usage quota or billing limit reached
    QuotaExhausted,
    /// E3001: Internal server error on provider side
    ServerError,
    /// E3002: Provider service temporarily unavailable or overloaded
    Overloaded,
    /// E3003: Request or model invocation timed out
    Timeout,
    /// E9999: Error could not be classified
    Unknown,
}

impl StandardErrorCode {
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "E1001",
            Self::Authentication => "E1002",
            Self::PermissionDenied => "E1003",
            Self::NotFound => "E1004",
            Self::RequestTooLarge => "E1005",
            Self::RateLimited => "E2001",
            Self::QuotaExhausted => "E2002",
            Self::ServerError => "E3001",
            Self::Overloaded => "E3002",
            Self::Timeout => "E3003",
            Self::Unknown => "E9999",
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a failure of this class is worth another attempt.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Overloaded | Self::Timeout
        )
    }

    /// Returns `"client"`, `"rate"`, `"server"` or `"unknown"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest
            | Self::Authentication
            | Self::PermissionDenied
            | Self::NotFound
            | Self::RequestTooLarge => "client",
            Self::RateLimited | Self::QuotaExhausted => "rate",
            Self::ServerError | Self::Overloaded | Self::Timeout => "server",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a provider error code or exception name to a standard code.
    ///
    /// Accepts the standard names plus the aliases seen in the wild, including the
    /// AWS exception names (`ThrottlingException`, `ServiceUnavailableException`,
    /// `TooManyRequestsException`, `ModelTimeoutException`, `InternalServerException`).
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let code = match provider_code {
            "invalid_request" | "invalid_request_error" | "ValidationException" => {
                Self::InvalidRequest
            }
            "authentication" | "invalid_api_key" | "authentication_error"
            | "UnrecognizedClientException" => Self::Authentication,
            "permission_denied" | "permission_error" | "AccessDeniedException" => {
                Self::PermissionDenied
            }
            "not_found" | "model_not_found" | "ResourceNotFoundException" => Self::NotFound,
            "request_too_large" | "context_length_exceeded" => Self::RequestTooLarge,
            "rate_limited" | "rate_limit_exceeded" | "ThrottlingException"
            | "TooManyRequestsException" => Self::RateLimited,
            "quota_exhausted" | "insufficient_quota" | "ServiceQuotaExceededException" => {
                Self::QuotaExhausted
            }
            "server_error" | "InternalServerException" | "ModelErrorException" => {
                Self::ServerError
            }
            "overloaded" | "overloaded_error" | "ServiceUnavailableException"
            | "ModelNotReadyException" => Self::Overloaded,
            "timeout" | "ModelTimeoutException" => Self::Timeout,
            _ => return None,
        };
        Some(code)
    }

    /// Maps an HTTP status to the most likely standard code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 => Self::Timeout,
            413 => Self::RequestTooLarge,
            429 => Self::RateLimited,
            503 | 529 => Self::Overloaded,
            504 => Self::Timeout,
            s if s >= 500 => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StandardErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
