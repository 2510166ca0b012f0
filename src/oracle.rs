//! Outbound client for the WAF oracle.
//!
//! One process-wide client with a fixed response-wait ceiling. The hyper
//! client forwards the `http::Uri` as parsed, so the inbound path and query
//! reach the oracle without normalization or re-encoding.

use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use once_cell::sync::Lazy;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{GateError, Result};

/// Response-wait ceiling for every oracle call.
pub const ORACLE_TIMEOUT: Duration = Duration::from_secs(2);

static SHARED: Lazy<OracleClient> = Lazy::new(|| OracleClient::with_timeout(ORACLE_TIMEOUT));

/// Oracle response together with the instant its budget runs out.
///
/// Dropping it releases the underlying connection back to the pool.
#[derive(Debug)]
pub struct OracleResponse {
    /// Status, headers and unread body
    pub response: Response<Incoming>,
    /// End of the exchange budget; the body must be relayed before this
    pub deadline: Instant,
}

/// HTTP client used to consult the oracle.
///
/// Cloning is cheap and clones share one connection pool.
#[derive(Debug, Clone)]
pub struct OracleClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl OracleClient {
    /// The process-wide client, bounded by [`ORACLE_TIMEOUT`].
    pub fn shared() -> Self {
        SHARED.clone()
    }

    /// A private client with its own pool and ceiling.
    pub fn with_timeout(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(timeout));

        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            timeout,
        }
    }

    /// Response-wait ceiling of this client.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one oracle request and wait for the response head.
    ///
    /// # Errors
    ///
    /// - `GateError::Timeout` if no response arrives within the ceiling.
    /// - `GateError::Dispatch` on connection, DNS or protocol failure.
    pub async fn send(&self, request: Request<Full<Bytes>>) -> Result<OracleResponse> {
        let deadline = Instant::now() + self.timeout;

        match tokio::time::timeout_at(deadline, self.client.request(request)).await {
            Ok(Ok(response)) => Ok(OracleResponse { response, deadline }),
            Ok(Err(e)) => {
                debug!(error = ?e, "Oracle transport error");
                Err(GateError::Dispatch(e.to_string()))
            }
            Err(_) => Err(GateError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_client_uses_fixed_ceiling() {
        assert_eq!(OracleClient::shared().timeout(), ORACLE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_connection_refused_is_dispatch_error() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OracleClient::with_timeout(Duration::from_secs(1));
        let request = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(Full::new(Bytes::new()))
            .unwrap();

        let err = client.send(request).await.unwrap_err();
        assert!(matches!(err, GateError::Dispatch(_)), "got {err:?}");
        assert!(
            err.to_string()
                .starts_with("oracle request failed: client error"),
            "got {err}"
        );
    }
}
