use axum::{
    Router,
    body::Bytes,
    http::{StatusCode, Uri},
    response::IntoResponse,
};
use std::net::SocketAddr;

/// Payload fragments the mock rejects.
const SIGNATURES: &[&str] = &["<script", "%3cscript", "' or 1=1", "%27%20or%201=1"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Every method and path lands on the same verdict handler
    let app = Router::new().fallback(verdict);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8081));
    tracing::info!("Mock WAF oracle listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        e
    })?;

    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        e
    })?;

    Ok(())
}

async fn verdict(uri: Uri, body: Bytes) -> impl IntoResponse {
    let target = uri.to_string().to_ascii_lowercase();
    let payload = String::from_utf8_lossy(&body).to_ascii_lowercase();

    match SIGNATURES
        .iter()
        .find(|sig| target.contains(*sig) || payload.contains(*sig))
    {
        Some(sig) => {
            tracing::info!(%uri, signature = %sig, "Rejecting request");
            (
                StatusCode::FORBIDDEN,
                [("x-waf-rule", "mock-signature")],
                "Forbidden: request matched a WAF signature\n",
            )
                .into_response()
        }
        None => {
            tracing::debug!(%uri, "Accepting request");
            StatusCode::OK.into_response()
        }
    }
}
