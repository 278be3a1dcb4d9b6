// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Error types for kaapi
//!
//! This module defines all error types used throughout the application.

use thiserror::Error;

/// Main error type for kaapi operations
#[derive(Error, Debug)]
pub enum KaapiError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Tool invocation errors (bad name, malformed arguments)
    #[error("Tool invocation failed: {0}")]
    Tool(String),

    /// Catalog store errors
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session errors
    #[error("Session error: {0}")]
    Session(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// Result type alias for kaapi operations
pub type Result<T> = std::result::Result<T, KaapiError>;

/// How an upstream failure should be presented to the user.
///
/// Drives the choice of canned fallback sentence in the orchestrator; it is
/// never used to retry the generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackClass {
    /// Provider is rate limiting or out of quota
    RateLimited,
    /// Anything that might succeed on a later request
    Transient,
    /// Everything else
    Other,
}

/// Markers in upstream error text that indicate rate limiting.
const RATE_LIMIT_MARKERS: &[&str] = &["429", "quota", "rate limit", "resource exhausted"];

impl KaapiError {
    /// Classify this error for fallback-message selection.
    ///
    /// Structured rate-limit variants win; otherwise the error text is
    /// matched against known rate-limit markers, the way the upstream
    /// services phrase them.
    pub fn fallback(&self) -> FallbackClass {
        if let KaapiError::Api(ApiError::RateLimited(_)) = self {
            return FallbackClass::RateLimited;
        }

        let text = self.to_string().to_lowercase();
        if RATE_LIMIT_MARKERS.iter().any(|m| text.contains(m)) {
            return FallbackClass::RateLimited;
        }

        match self {
            KaapiError::Api(ApiError::Timeout)
            | KaapiError::Api(ApiError::Network(_))
            | KaapiError::Api(ApiError::StreamError(_))
            | KaapiError::Catalog(_)
            | KaapiError::Http(_) => FallbackClass::Transient,
            _ => FallbackClass::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kaapi_error_tool() {
        let err = KaapiError::Tool("bad arguments".to_string());
        assert!(err.to_string().contains("Tool invocation failed"));
        assert!(err.to_string().contains("bad arguments"));
    }

    #[test]
    fn test_kaapi_error_catalog() {
        let err = KaapiError::Catalog("table missing".to_string());
        assert!(err.to_string().contains("Catalog error"));
    }

    #[test]
    fn test_kaapi_error_config() {
        let err = KaapiError::Config("no api key".to_string());
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_kaapi_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KaapiError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_api_error_rate_limited() {
        let err = ApiError::RateLimited(30);
        assert!(err.to_string().contains("Rate limited"));
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_api_error_server_error() {
        let err = ApiError::ServerError {
            status: 500,
            message: "internal".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("internal"));
    }

    #[test]
    fn test_fallback_structured_rate_limit() {
        let err = KaapiError::Api(ApiError::RateLimited(10));
        assert_eq!(err.fallback(), FallbackClass::RateLimited);
    }

    #[test]
    fn test_fallback_429_in_text() {
        let err = KaapiError::Api(ApiError::ServerError {
            status: 429,
            message: "HTTP 429 too many requests".to_string(),
        });
        assert_eq!(err.fallback(), FallbackClass::RateLimited);
    }

    #[test]
    fn test_fallback_quota_in_text() {
        let err = KaapiError::Api(ApiError::InvalidResponse(
            "Quota exceeded for model".to_string(),
        ));
        assert_eq!(err.fallback(), FallbackClass::RateLimited);
    }

    #[test]
    fn test_fallback_timeout_is_transient() {
        let err = KaapiError::Api(ApiError::Timeout);
        assert_eq!(err.fallback(), FallbackClass::Transient);
    }

    #[test]
    fn test_fallback_network_is_transient() {
        let err = KaapiError::Api(ApiError::Network("connection refused".to_string()));
        assert_eq!(err.fallback(), FallbackClass::Transient);
    }

    #[test]
    fn test_fallback_catalog_is_transient() {
        let err = KaapiError::Catalog("database locked".to_string());
        assert_eq!(err.fallback(), FallbackClass::Transient);
    }

    #[test]
    fn test_fallback_tool_is_other() {
        let err = KaapiError::Tool("unparseable arguments".to_string());
        assert_eq!(err.fallback(), FallbackClass::Other);
    }

    #[test]
    fn test_fallback_server_error_is_other() {
        let err = KaapiError::Api(ApiError::ServerError {
            status: 500,
            message: "internal error".to_string(),
        });
        assert_eq!(err.fallback(), FallbackClass::Other);
    }
}
