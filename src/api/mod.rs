//! HTTP surface: router composition and OpenAPI document.
//!
//! The console endpoint is mounted under `/v1`; health and API docs live
//! at the root.

pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};

/// Path the OpenAPI document is served from.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// OpenAPI description of the sidecar.
#[derive(Debug, OpenApi)]
#[openapi(
    info(description = "KubeVirt VNC proxy \"/v1\" API."),
    paths(crate::vnc::handler::vnc_handler, handlers::system::health_handler),
    components(schemas(ErrorResponse, ErrorBody)),
    tags(
        (name = "VNC", description = "VM console over WebSocket"),
        (name = "System", description = "Health and service metadata"),
    )
)]
pub struct ApiDoc;

/// Builds the complete router with all endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .config(utoipa_swagger_ui::Config::new([OPENAPI_PATH])),
    );

    router
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::net::UnixListener;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::vnc::SocketLocator;
    use crate::vnc::locator::SOCKET_FILE_NAME;

    fn app(base_dir: &std::path::Path) -> Router {
        let state = AppState::new(SocketLocator::new(base_dir), CancellationToken::new());
        build_router().with_state(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let Ok(request) = Request::builder().uri(uri).body(Body::empty()) else {
            panic!("failed to build request");
        };
        let Ok(response) = app.oneshot(request).await else {
            panic!("router failed");
        };
        let status = response.status();
        let Ok(body) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("failed to read body");
        };
        let Ok(json) = serde_json::from_slice(&body) else {
            panic!("body is not JSON");
        };
        (status, json)
    }

    fn scratch_dir() -> tempfile::TempDir {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("failed to create temp dir");
        };
        dir
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let dir = scratch_dir();
        let (status, json) = get_json(app(dir.path()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn openapi_documents_vnc_route() {
        let dir = scratch_dir();
        let (status, json) = get_json(app(dir.path()), OPENAPI_PATH).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["paths"]["/v1/vnc"]["get"]["operationId"], "v1VNC");
    }

    #[tokio::test]
    async fn vnc_without_vm_is_service_unavailable() {
        let dir = scratch_dir();
        let (status, json) = get_json(app(dir.path()), "/v1/vnc").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"]["code"], 2001);
        assert_eq!(json["error"]["message"], "could not find UUID directory");
    }

    #[tokio::test]
    async fn vnc_without_upgrade_is_bad_request() {
        let dir = scratch_dir();
        let vm_dir = dir.path().join("123e4567-e89b-12d3-a456-426614174000");
        if let Err(e) = std::fs::create_dir(&vm_dir) {
            panic!("failed to create VM dir: {e}");
        }
        let Ok(_listener) = UnixListener::bind(vm_dir.join(SOCKET_FILE_NAME)) else {
            panic!("failed to bind socket");
        };

        let (status, json) = get_json(app(dir.path()), "/v1/vnc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], 1001);
    }

    #[tokio::test]
    async fn vnc_with_dead_socket_is_bad_gateway() {
        let dir = scratch_dir();
        if let Err(e) = std::fs::create_dir(dir.path().join("123e4567-e89b-12d3-a456-426614174000"))
        {
            panic!("failed to create VM dir: {e}");
        }

        let (status, json) = get_json(app(dir.path()), "/v1/vnc").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["code"], 3001);
        let Some(details) = json["error"]["details"].as_str() else {
            panic!("expected details in dial error body");
        };
        assert!(details.ends_with("/virt-vnc"));
    }
}
