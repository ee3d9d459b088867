//! Status HTTP server
//!
//! Exposes the queue snapshot and finished results for browsers and scripts.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use thiserror::Error;

use crate::engine::{ProcessingEngine, StatusSnapshot};
use crate::export::result_file_name;

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /queue
async fn get_queue(State(engine): State<ProcessingEngine>) -> Json<StatusSnapshot> {
    Json(engine.status().await)
}

/// Handler for GET /health
async fn get_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Handler for GET /results/:id
/// Returns the processed image, or 404 when the item has no result
async fn get_result(State(engine): State<ProcessingEngine>, Path(id): Path<String>) -> Response {
    let Some(result) = engine.store().result(&id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({ "detail": "Result not found" })))
            .into_response();
    };

    let format = engine.config().output_format;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        result_file_name(&result.name, format).replace('"', "")
    );
    (
        [
            (header::CONTENT_TYPE, format.media_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        result.bytes,
    )
        .into_response()
}

/// Handler for GET /previews/:id
/// Returns the original image of an item, or 404 when the item is gone
async fn get_preview(State(engine): State<ProcessingEngine>, Path(id): Path<String>) -> Response {
    let Some(preview) = engine.store().preview(&id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({ "detail": "Preview not found" })))
            .into_response();
    };

    ([(header::CONTENT_TYPE, preview.media_type)], preview.bytes).into_response()
}

/// Creates the axum Router with the status endpoints
pub fn create_status_router(engine: ProcessingEngine) -> Router {
    Router::new()
        .route("/queue", get(get_queue))
        .route("/health", get(get_health))
        .route("/results/:id", get(get_result))
        .route("/previews/:id", get(get_preview))
        .with_state(engine)
}

/// Runs the status server on `bind` until it fails
pub async fn run_status_server(engine: ProcessingEngine, bind: &str) -> Result<(), ServerError> {
    let addr: std::net::SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "status server listening");
    axum::serve(listener, create_status_router(engine)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::ingest::{IngestionGate, RawFile};
    use crate::mode::ModeState;
    use crate::processor::{BackgroundRemover, ProcessFailure, ProcessParams, SourceImage};
    use crate::store::QueueStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Echo;

    #[async_trait]
    impl BackgroundRemover for Echo {
        async fn remove_background(
            &self,
            source: &SourceImage,
            _params: &ProcessParams,
        ) -> Result<Bytes, ProcessFailure> {
            if source.name.starts_with("bad") {
                return Err(ProcessFailure::with_detail("unsupported image"));
            }
            Ok(Bytes::from(format!("cut:{}", source.name)))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    async fn processed_engine() -> ProcessingEngine {
        let engine = ProcessingEngine::new(
            QueueStore::new(),
            Arc::new(Echo),
            ModeState::default(),
            EngineConfig::default(),
        );
        let files = vec![
            RawFile::new("cat.jpg", "image/jpeg", Bytes::from_static(b"jpg")),
            RawFile::new("bad.png", "image/png", Bytes::from_static(b"png")),
        ];
        IngestionGate::default().submit(engine.store(), files).await.unwrap();
        engine.run_until_idle().await.unwrap();
        engine
    }

    async fn get(engine: ProcessingEngine, uri: &str) -> Response {
        create_status_router(engine)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_queue_returns_snapshot_json() {
        let engine = processed_engine().await;
        let response = get(engine, "/queue").await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .expect("should have content-type header");
        assert!(content_type.to_str().unwrap().contains("application/json"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["mode"], "local");
        assert_eq!(value["running"], false);
        assert_eq!(value["queue"]["counts"]["success"], 1);
        assert_eq!(value["queue"]["counts"]["error"], 1);
        assert_eq!(value["queue"]["summary"], "1 completed • 1 failed");
        assert_eq!(value["queue"]["banner"], "unsupported image");
        assert_eq!(value["queue"]["items"][0]["status"], "success");
        assert_eq!(value["queue"]["items"][1]["error"], "unsupported image");
    }

    #[tokio::test]
    async fn test_health() {
        let engine = processed_engine().await;
        let response = get(engine, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_result_download() {
        let engine = processed_engine().await;
        let id = engine.store().snapshot().await.items[0].id.clone();

        let response = get(engine, &format!("/results/{}", id)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"nobg-cat.png\""
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"cut:cat.jpg"));
    }

    #[tokio::test]
    async fn test_missing_or_failed_result_is_404() {
        let engine = processed_engine().await;
        let failed_id = engine.store().snapshot().await.items[1].id.clone();

        let response = get(engine.clone(), &format!("/results/{}", failed_id)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get(engine, "/results/does-not-exist").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preview_serves_original_bytes() {
        let engine = processed_engine().await;
        let snapshot = engine.store().snapshot().await;
        let id = snapshot.items[0].id.clone();

        let response = get(engine.clone(), &format!("/previews/{}", id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"jpg"));

        // Failed items keep their preview.
        let failed_id = snapshot.items[1].id.clone();
        let response = get(engine.clone(), &format!("/previews/{}", failed_id)).await;
        assert_eq!(response.status(), StatusCode::OK);

        engine.reset().await;
        let response = get(engine, &format!("/previews/{}", id)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let engine = processed_engine().await;
        let err = run_status_server(engine, "not-an-address").await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress(_)));
    }
}
