//! Request inspection against the WAF oracle.
//!
//! The inspector owns the per-request algorithm:
//!
//! 1. WebSocket upgrades bypass inspection.
//! 2. The body is captured once into an owned buffer.
//! 3. Two independent views are built over that buffer, one for the oracle
//!    request and one restored onto the inbound request.
//! 4. The oracle answers; `>= 400` blocks and its response is relayed
//!    verbatim, anything else allows the request onward.
//!
//! The tower plumbing lives in [`crate::service`]; this module has no
//! knowledge of the next handler.

use std::sync::Arc;

use bytes::Bytes;
use http::header::HOST;
use http::uri::{Authority, PathAndQuery};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Uri, request};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::oracle::{OracleClient, OracleResponse};
use crate::timeout::TimeoutBody;
use crate::upgrade::is_websocket_upgrade;
use crate::{BoxError, GateBody, boxed};

/// Lowest oracle status treated as a rejection.
pub const BLOCK_THRESHOLD: u16 = 400;

/// Outcome of inspecting one request.
#[derive(Debug)]
pub enum Verdict {
    /// Not eligible for inspection; forward the untouched request.
    Bypass(Request<GateBody>),

    /// The oracle approved; forward the request with its restored body.
    Allow(Request<GateBody>),

    /// The oracle rejected; return its response to the caller.
    Block(Response<GateBody>),
}

impl Verdict {
    /// Returns `true` if the request skipped the oracle.
    pub fn is_bypass(&self) -> bool {
        matches!(self, Verdict::Bypass(_))
    }

    /// Returns `true` if the oracle allowed the request.
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow(_))
    }

    /// Returns `true` if the oracle blocked the request.
    pub fn is_block(&self) -> bool {
        matches!(self, Verdict::Block(_))
    }
}

/// Returns `true` if an oracle status means "block".
pub fn is_rejection(status: StatusCode) -> bool {
    status.as_u16() >= BLOCK_THRESHOLD
}

/// Which inbound headers travel to the oracle.
///
/// The default is [`CopyAll`]. Implement this to strip credentials or add
/// oracle-specific headers.
pub trait HeaderPolicy: Send + Sync + 'static {
    /// Fill `outbound` (empty on entry) from `inbound`.
    fn apply(&self, inbound: &HeaderMap, outbound: &mut HeaderMap);
}

/// Copy every header name and all of its values, filter none.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyAll;

impl HeaderPolicy for CopyAll {
    fn apply(&self, inbound: &HeaderMap, outbound: &mut HeaderMap) {
        for (name, value) in inbound {
            outbound.append(name.clone(), value.clone());
        }
    }
}

/// Oracle target: `base` followed by the inbound path and query as received.
///
/// # Errors
///
/// Returns `GateError::InvalidTarget` if the concatenation is not a valid URI.
pub fn oracle_uri(base: &str, target: &Uri) -> Result<Uri> {
    let path_and_query = target
        .path_and_query()
        .map(PathAndQuery::as_str)
        .unwrap_or("/");
    let joined = format!("{base}{path_and_query}");

    match joined.parse::<Uri>() {
        Ok(uri) => Ok(uri),
        Err(e) => Err(GateError::InvalidTarget {
            target: joined,
            reason: e.to_string(),
        }),
    }
}

/// Replace each header present in `src` with all of its values from `src`.
///
/// Headers only present in `dst` are left alone.
pub fn overwrite_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for name in src.keys() {
        dst.remove(name);
        for value in src.get_all(name) {
            dst.append(name.clone(), value.clone());
        }
    }
}

/// Consults the oracle for each request and produces a [`Verdict`].
///
/// Cheap to clone; clones share configuration and the oracle client.
#[derive(Clone)]
pub struct Inspector {
    name: Arc<str>,
    base_url: Arc<str>,
    client: OracleClient,
    headers: Arc<dyn HeaderPolicy>,
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl Inspector {
    /// Build an inspector using the shared oracle client.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Config` if `config` is invalid.
    pub fn new(config: &GateConfig, name: impl Into<String>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            name: Arc::from(name.into()),
            base_url: Arc::from(config.mod_security_url.as_str()),
            client: OracleClient::shared(),
            headers: Arc::new(CopyAll),
        })
    }

    /// Use a different oracle client.
    #[must_use]
    pub fn with_client(mut self, client: OracleClient) -> Self {
        self.client = client;
        self
    }

    /// Use a different header policy for oracle requests.
    #[must_use]
    pub fn with_header_policy(mut self, policy: impl HeaderPolicy) -> Self {
        self.headers = Arc::new(policy);
        self
    }

    /// Instance name given by the hosting runtime.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Oracle base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Inspect one inbound request.
    ///
    /// # Errors
    ///
    /// - `GateError::BodyRead` if the inbound body fails mid-stream.
    /// - `GateError::InvalidTarget`, `GateError::Dispatch` or
    ///   `GateError::Timeout` if the oracle could not be consulted.
    pub async fn inspect<B>(&self, request: Request<B>) -> Result<Verdict>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        if is_websocket_upgrade(request.headers()) {
            debug!(gate = %self.name, uri = %request.uri(), "WebSocket upgrade, skipping inspection");
            return Ok(Verdict::Bypass(request.map(boxed)));
        }

        let (parts, body) = request.into_parts();
        let captured = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let e: BoxError = e.into();
                warn!(gate = %self.name, uri = %parts.uri, error = %e, "Failed to read request body");
                return Err(GateError::BodyRead(e.to_string()));
            }
        };

        let oracle_request = self.oracle_request(&parts, captured.clone())?;
        let restored = Request::from_parts(parts, boxed(Full::new(captured)));

        let OracleResponse { response, deadline } =
            match self.client.send(oracle_request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(gate = %self.name, uri = %restored.uri(), error = %e, "Oracle unavailable");
                    return Err(e);
                }
            };

        let status = response.status();
        if is_rejection(status) {
            info!(
                gate = %self.name,
                method = %restored.method(),
                uri = %restored.uri(),
                status = status.as_u16(),
                "Request blocked by oracle"
            );
            return Ok(Verdict::Block(relay(response, deadline)));
        }

        // Release the oracle connection before the request moves on
        drop(response);
        debug!(gate = %self.name, uri = %restored.uri(), status = status.as_u16(), "Request allowed");
        Ok(Verdict::Allow(restored))
    }

    /// Build the oracle's copy of an inbound request.
    ///
    /// `Host` always names the oracle, whatever the header policy copied.
    fn oracle_request(&self, parts: &request::Parts, body: Bytes) -> Result<Request<Full<Bytes>>> {
        let uri = oracle_uri(&self.base_url, &parts.uri)?;
        let host = uri.authority().and_then(oracle_host);

        let mut request = Request::new(Full::new(body));
        *request.method_mut() = parts.method.clone();
        *request.uri_mut() = uri;
        self.headers.apply(&parts.headers, request.headers_mut());

        match host {
            Some(host) => {
                request.headers_mut().insert(HOST, host);
            }
            // hyper derives it from the URI
            None => {
                request.headers_mut().remove(HOST);
            }
        }
        Ok(request)
    }
}

/// `Host` value for the oracle: host and port, without userinfo.
fn oracle_host(authority: &Authority) -> Option<HeaderValue> {
    let host = match authority.port() {
        Some(port) => format!("{}:{}", authority.host(), port),
        None => authority.host().to_string(),
    };
    HeaderValue::from_str(&host).ok()
}

/// Turn the oracle's rejection into the caller's response.
fn relay(response: Response<Incoming>, deadline: Instant) -> Response<GateBody> {
    let (parts, body) = response.into_parts();

    let mut relayed = Response::new(boxed(TimeoutBody::new(body, deadline)));
    *relayed.status_mut() = parts.status;
    overwrite_headers(relayed.headers_mut(), &parts.headers);
    relayed
}
