//! HTTP server for the Prometheus scrape endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::StartupError;
use crate::exposition::{CONTENT_TYPE as EXPOSITION_CONTENT_TYPE, Exposition};

/// Create the HTTP router.
pub fn create_router(exposition: Exposition, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(exposition)
}

/// Handler for the metrics endpoint. Renders whatever the registry holds;
/// never contacts the modem.
async fn metrics_handler(State(exposition): State<Exposition>) -> Response {
    let document = exposition.handle_scrape();

    (
        StatusCode::OK,
        [(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        document.into_string(),
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(exposition): State<Exposition>) -> Response {
    if exposition.registry().read().latest().is_some() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no successful poll yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    exposition: Exposition,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(exposition: Exposition, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            exposition,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listener. Fails fast so a taken port aborts startup.
    pub async fn bind(self) -> Result<BoundHttpServer, StartupError> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|source| StartupError::BindFailed {
                addr: self.listen_addr,
                source,
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|source| StartupError::BindFailed {
                addr: self.listen_addr,
                source,
            })?;

        info!(
            addr = %local_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        Ok(BoundHttpServer {
            router: create_router(self.exposition, &self.metrics_path),
            listener,
            local_addr,
        })
    }
}

/// A server whose listener is bound and ready to accept.
pub struct BoundHttpServer {
    router: Router,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundHttpServer {
    /// Address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposition::RenderOptions;
    use crate::payload::DeviceFamily;
    use crate::registry::MetricRegistry;
    use crate::snapshot::{DeviceInfo, Sample, Stat, StatSnapshot};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn make_exposition() -> Exposition {
        Exposition::new(Arc::new(MetricRegistry::new()), RenderOptions::default())
    }

    fn snapshot() -> StatSnapshot {
        StatSnapshot::new(
            DeviceFamily::ZteGoform,
            Utc::now(),
            DeviceInfo {
                model: "MF286R".into(),
                firmware: "B07".into(),
            },
            vec![Sample::new(Stat::Rsrp, -104.0)],
        )
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = create_router(make_exposition(), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("version=0.0.4"));

        let body = body_text(response).await;
        assert!(body.contains("exporter_up 0\n"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_exposition(), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_not_ready() {
        let router = create_router(make_exposition(), "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_endpoint_ready() {
        let exposition = make_exposition();
        exposition.registry().update(snapshot());

        let router = create_router(exposition, "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_after_update() {
        let exposition = make_exposition();
        exposition.registry().update(snapshot());
        let router = create_router(exposition, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_text(response).await;

        assert!(body.contains("modem_rsrp_dbm -104\n"));
        assert!(body.contains("exporter_up 1\n"));
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_exposition(), "/prometheus/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_conflict_fails_fast() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let result = HttpServer::new(make_exposition(), addr, "/metrics".into())
            .bind()
            .await;

        match result {
            Err(StartupError::BindFailed { addr: failed, .. }) => assert_eq!(failed, addr),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("bind should fail while the port is taken"),
        }
    }
}
