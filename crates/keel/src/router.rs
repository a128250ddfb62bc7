//! HTTP router configuration

use std::sync::Arc;

use axum::{Router, routing::get};
use utoipa::OpenApi;

use keel_api::{DeliverableInfo, HealthResponse, Level, ProgressStatus, StatusEvent};

use crate::api::{ApiError, progress, system};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(title = "keel progress server"),
    paths(
        system::health,
        progress::progress,
        progress::logs,
        progress::kubeconfig,
        progress::deliverables,
        progress::deliverable,
    ),
    components(schemas(
        ApiError,
        DeliverableInfo,
        HealthResponse,
        Level,
        ProgressStatus,
        StatusEvent
    ))
)]
pub struct ApiDoc;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // System endpoints
        .route("/health", get(system::health))
        .route("/openapi.json", get(system::openapi))
        // Progress of the hosted run
        .route("/progress", get(progress::progress))
        .route("/logs", get(progress::logs))
        .route("/kubeconfig", get(progress::kubeconfig))
        .route("/deliverables", get(progress::deliverables))
        .route("/deliverables/{name}", get(progress::deliverable))
        // State
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use keel_client::{ClientError, HttpClient};
    use keel_core::{Deliverable, ProgressState};

    use super::*;

    struct Harness {
        client: HttpClient,
        progress: ProgressState,
        dir: tempfile::TempDir,
    }

    async fn serve() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressState::new();
        let state = Arc::new(AppState::new(
            progress.clone(),
            dir.path().join("keel.log"),
            dir.path().join("kubeconfig"),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        Harness {
            client: HttpClient::new(format!("http://{addr}")).unwrap(),
            progress,
            dir,
        }
    }

    #[tokio::test]
    async fn test_health() {
        let h = serve().await;
        assert_eq!(h.client.health().await.unwrap().status, "ok");
    }

    #[tokio::test]
    async fn test_progress_reflects_state() {
        let h = serve().await;
        h.progress.append(StatusEvent::info("Bootstrap cluster created"));

        let status = h.client.progress().await.unwrap();
        assert!(!status.complete);
        assert_eq!(status.messages.len(), 1);

        h.progress.complete(true);
        let status = h.client.progress().await.unwrap();
        assert!(status.complete);
        assert!(status.completed_successfully);
        assert!(status.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_kubeconfig_is_500_until_written() {
        let h = serve().await;

        match h.client.kubeconfig().await {
            Err(ClientError::Api { status, .. }) => assert_eq!(status, 500),
            other => panic!("expected 500, got {other:?}"),
        }

        std::fs::write(h.dir.path().join("kubeconfig"), "").unwrap();
        assert!(h.client.kubeconfig().await.is_err());

        std::fs::write(h.dir.path().join("kubeconfig"), "apiVersion: v1\n").unwrap();
        assert_eq!(h.client.kubeconfig().await.unwrap(), b"apiVersion: v1\n");
    }

    #[tokio::test]
    async fn test_logs_served_raw() {
        let h = serve().await;
        std::fs::write(h.dir.path().join("keel.log"), "line one\nline two\n").unwrap();

        assert_eq!(h.client.logs().await.unwrap(), b"line one\nline two\n");
    }

    #[tokio::test]
    async fn test_deliverables_listed_and_downloaded() {
        let h = serve().await;
        let artifact = h.dir.path().join("rke-cluster.yml");
        std::fs::write(&artifact, "nodes: []\n").unwrap();
        h.progress
            .add_deliverable(Deliverable::new("rke-cluster.yml", artifact));

        let list = h.client.deliverables().await.unwrap();
        assert_eq!(
            list,
            vec![DeliverableInfo {
                name: "rke-cluster.yml".into(),
                url: "/deliverables/rke-cluster.yml".into(),
            }]
        );

        let dest = h.dir.path().join("out").join("rke-cluster.yml");
        let bytes = h.client.download("rke-cluster.yml", &dest).await.unwrap();
        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "nodes: []\n");

        match h.client.download("missing", &h.dir.path().join("missing")).await {
            Err(ClientError::Api { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected 404, got {other:?}"),
        }
    }

    #[test]
    fn test_openapi_lists_paths() {
        let doc = ApiDoc::openapi();
        for path in ["/health", "/progress", "/logs", "/kubeconfig", "/deliverables/{name}"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
