//! ModSecurity gate - tower middleware that consults an external WAF.
//!
//! Every inbound request is copied to a web-application-firewall oracle
//! (for example a ModSecurity/OWASP CRS container). If the oracle answers
//! with a status of 400 or above, its response is relayed to the caller and
//! the wrapped service never runs. Otherwise the original request, body
//! intact, continues to the wrapped service.
//!
//! # Example
//!
//! ```no_run
//! use modsec_gate::{GateBody, GateConfig, ModSecurityLayer};
//! use tower::{Layer, service_fn};
//!
//! # fn main() -> Result<(), modsec_gate::GateError> {
//! let config = GateConfig::from_json(r#"{"modSecurityUrl":"http://waf:8080"}"#)?;
//! let layer = ModSecurityLayer::new(&config, "modsecurity")?;
//!
//! let app = layer.layer(service_fn(|_req: http::Request<GateBody>| async {
//!     Ok::<_, std::convert::Infallible>(http::Response::new(String::from("hello")))
//! }));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```
//!
//! # Request Paths
//!
//! - **Bypass:** WebSocket upgrades go straight to the wrapped service.
//! - **Allow:** oracle status below 400.
//! - **Block:** oracle status 400 or above, relayed verbatim.
//! - **Failure:** unreadable body (500) or unreachable oracle (502).

pub mod config;
pub mod error;
pub mod inspector;
pub mod oracle;
pub mod service;
pub mod timeout;
pub mod upgrade;

use bytes::Bytes;
use http_body::Body;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;

pub use config::GateConfig;
pub use error::{GateError, Result};
pub use inspector::{CopyAll, HeaderPolicy, Inspector, Verdict};
pub use oracle::{ORACLE_TIMEOUT, OracleClient};
pub use service::{ModSecurity, ModSecurityLayer};

/// Boxed error used by gate bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type the gate hands to the wrapped service and returns to callers.
pub type GateBody = UnsyncBoxBody<Bytes, BoxError>;

/// Erase a body into a [`GateBody`].
pub fn boxed<B>(body: B) -> GateBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}
