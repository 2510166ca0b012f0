//! Error types for the inspection gate.
//!
//! Every failure is converted into an HTTP response at the point where it
//! happens. Nothing is retried.

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode, header};
use http_body_util::{BodyExt, Full};
use thiserror::Error;

use crate::GateBody;

/// Errors raised while building or running the gate.
#[derive(Debug, Error)]
pub enum GateError {
    /// Plugin configuration rejected at construction time.
    #[error("{0}")]
    Config(String),

    /// The inbound request body could not be read to the end.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// The oracle target could not be formed from the base URL and request target.
    #[error("invalid oracle target {target}: {reason}")]
    InvalidTarget {
        /// The concatenated target that failed to parse
        target: String,
        /// Parser error
        reason: String,
    },

    /// Transport-level failure talking to the oracle.
    #[error("oracle request failed: {0}")]
    Dispatch(String),

    /// The oracle did not answer within the response-wait ceiling.
    #[error("oracle did not respond within {0:?}")]
    Timeout(std::time::Duration),
}

impl GateError {
    /// HTTP status reported to the original caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::Config(_) | GateError::BodyRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::InvalidTarget { .. } | GateError::Dispatch(_) | GateError::Timeout(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Plain-text error response for the original caller.
    pub fn into_response(self) -> Response<GateBody> {
        let status = self.status_code();
        let body = Full::new(Bytes::from(format!("{self}\n")))
            .map_err(|never| match never {})
            .boxed_unsync();

        let mut response = Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        response
    }
}

/// Result alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GateError::BodyRead("reset".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GateError::Dispatch("connection refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GateError::Timeout(Duration::from_secs(2)).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GateError::InvalidTarget {
                target: "nope".into(),
                reason: "bad".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_error_response_is_plain_text() {
        let response = GateError::Dispatch("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "oracle request failed: connection refused\n");
    }
}
