//! Protocol eligibility check.
//!
//! WebSocket upgrades cannot be expressed as one buffered request/response
//! exchange, so the gate lets them through without consulting the oracle.

use http::HeaderMap;
use http::header::UPGRADE;

/// Returns `true` if any `Upgrade` value asks for a WebSocket connection.
///
/// Each header value is a comma-separated protocol list (`websocket`,
/// `h2c, websocket`, ...). Protocol names compare case-insensitively and an
/// optional `/version` suffix is ignored.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(UPGRADE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().split('/').next().unwrap_or_default())
        .any(|protocol| protocol.eq_ignore_ascii_case("websocket"))
}
