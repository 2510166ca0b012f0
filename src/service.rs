//! Tower middleware wrapping the next handler in the chain.
//!
//! `ModSecurity<S>` is one link: it runs the [`Inspector`] and either
//! answers itself (block, failure) or calls `S` (bypass, allow).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Request, Response};
use http_body::Body;
use tower::Layer;
use tower_service::Service;

use crate::config::GateConfig;
use crate::error::Result;
use crate::inspector::{Inspector, Verdict};
use crate::{BoxError, GateBody, boxed};

type NextFuture<B, E> = Pin<Box<dyn Future<Output = std::result::Result<Response<B>, E>> + Send>>;

/// Layer that puts a [`ModSecurity`] gate in front of a service.
#[derive(Debug, Clone)]
pub struct ModSecurityLayer {
    inspector: Inspector,
}

impl ModSecurityLayer {
    /// Create a layer from plugin configuration.
    ///
    /// `name` identifies the instance in logs.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Config` if `modSecurityUrl` is empty.
    pub fn new(config: &GateConfig, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            inspector: Inspector::new(config, name)?,
        })
    }

    /// Create a layer around an already configured inspector.
    pub fn from_inspector(inspector: Inspector) -> Self {
        Self { inspector }
    }
}

impl<S> Layer<S> for ModSecurityLayer {
    type Service = ModSecurity<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ModSecurity {
            inner,
            inspector: self.inspector.clone(),
        }
    }
}

/// Inspection gate in front of `S`.
#[derive(Debug, Clone)]
pub struct ModSecurity<S> {
    inner: S,
    inspector: Inspector,
}

impl<S> ModSecurity<S> {
    /// Wrap `next` with a gate built from `config`.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Config` if `modSecurityUrl` is empty; no gate is
    /// produced in that case.
    pub fn new(next: S, config: &GateConfig, name: impl Into<String>) -> Result<Self> {
        Ok(ModSecurityLayer::new(config, name)?.layer(next))
    }

    /// The inspector this gate runs.
    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    /// The wrapped service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ModSecurity<S>
where
    S: Service<Request<GateBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Body<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<GateBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Keep the service that was polled ready; leave a fresh clone behind
        let clone = self.inner.clone();
        let mut next = std::mem::replace(&mut self.inner, clone);
        let inspector = self.inspector.clone();

        Box::pin(async move {
            match inspector.inspect(request).await {
                Ok(Verdict::Bypass(request)) | Ok(Verdict::Allow(request)) => {
                    // Boxed before awaiting so the outer future stays `Send`
                    let pending: NextFuture<ResBody, S::Error> = Box::pin(next.call(request));
                    let response = pending.await?;
                    Ok(response.map(boxed))
                }
                Ok(Verdict::Block(response)) => Ok(response),
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use http::StatusCode;
    use http::header::UPGRADE;
    use http_body_util::{BodyExt, Full};
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::util::BoxCloneService;
    use tower::{ServiceExt, service_fn};

    type Next = BoxCloneService<Request<GateBody>, Response<Full<Bytes>>, Infallible>;

    fn echo(calls: Arc<AtomicUsize>) -> Next {
        service_fn(move |request: Request<GateBody>| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let body = request.into_body().collect().await.unwrap().to_bytes();
                Ok::<_, Infallible>(Response::new(Full::new(body)))
            }
        })
        .boxed_clone()
    }

    #[test]
    fn test_missing_url_produces_no_gate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = ModSecurity::new(echo(calls), &GateConfig::default(), "modsecurity");
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_layer_keeps_name() {
        let layer = ModSecurityLayer::new(&GateConfig::new("http://waf:8080"), "waf-a").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = layer.layer(echo(calls));
        assert_eq!(gate.inspector().name(), "waf-a");
        assert_eq!(gate.inspector().base_url(), "http://waf:8080");
    }

    #[tokio::test]
    async fn test_websocket_reaches_next_without_oracle() {
        let calls = Arc::new(AtomicUsize::new(0));
        // Nothing listens on the oracle port
        let gate = ModSecurity::new(
            echo(calls.clone()),
            &GateConfig::new("http://127.0.0.1:1"),
            "modsecurity",
        )
        .unwrap();

        let request = Request::builder()
            .uri("/socket")
            .header(UPGRADE, "websocket")
            .body(Full::new(Bytes::from_static(b"ping")))
            .unwrap();

        let response = gate.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "ping");
    }

    #[tokio::test]
    async fn test_gate_future_can_be_spawned() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = ModSecurity::new(
            echo(calls.clone()),
            &GateConfig::new("http://127.0.0.1:1"),
            "modsecurity",
        )
        .unwrap();

        let request = Request::builder()
            .uri("/socket")
            .header(UPGRADE, "websocket")
            .body(Full::new(Bytes::from_static(b"ping")))
            .unwrap();

        // Runs the next-handler path on another task, which requires `Send`
        let response = tokio::spawn(gate.oneshot(request)).await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_oracle_returns_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let calls = Arc::new(AtomicUsize::new(0));
        let gate = ModSecurity::new(
            echo(calls.clone()),
            &GateConfig::new(format!("http://{addr}")),
            "modsecurity",
        )
        .unwrap();

        let request = Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = gate.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
