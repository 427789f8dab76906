//! Shared plumbing for OpenAI-compatible HTTP providers.

use reqwest::StatusCode;

use lode_core::error::{LodeError, Result};

/// Read an API key from the named environment variable.
pub fn api_key_from_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(LodeError::Config(format!(
            "environment variable {} is not set",
            var
        ))),
    }
}

/// Join a base URL and an endpoint path without doubling the slash.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Rate limits, request timeouts, and server-side failures may clear up on
/// their own; everything else in the 4xx range is the caller's fault.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Map a non-success response into a classified provider error.
pub fn status_error(status: StatusCode, body: &str) -> LodeError {
    let message = format!("status {}: {}", status, body.trim());
    if is_transient_status(status) {
        LodeError::transient(message)
    } else {
        LodeError::provider(message)
    }
}

/// Map a transport-level failure into a classified provider error.
pub fn request_error(err: reqwest::Error) -> LodeError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        LodeError::transient(err.to_string())
    } else {
        LodeError::provider(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            endpoint("http://localhost:8080/v1", "chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_status_error_transient_flag() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "busy").is_transient());
        let err = status_error(StatusCode::BAD_REQUEST, "input too long ");
        assert!(!err.is_transient());
        assert!(err.to_string().contains("input too long"));
    }

    #[test]
    fn test_api_key_missing() {
        let result = api_key_from_env("LODE_TEST_DEFINITELY_UNSET_KEY");
        assert!(matches!(result, Err(LodeError::Config(_))));
    }
}
