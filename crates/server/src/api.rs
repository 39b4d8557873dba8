use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use mailward_core::StructuredEmail;
use mailward_pipeline::{IngestOutcome, IngestProducer};

/// `GET /health` -- trivial liveness body naming the service.
async fn health(State(service): State<&'static str>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": service }))
}

/// Router serving only the health endpoint; used by every worker role.
pub fn health_router(service: &'static str) -> Router {
    Router::new().route("/health", get(health)).with_state(service)
}

/// Request body for the ingest endpoint: a parsed email plus its owner.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub user_id: Uuid,
    pub email: StructuredEmail,
}

#[derive(Clone)]
struct IngestState {
    producer: Arc<IngestProducer>,
}

/// `POST /ingest` -- offer one email to the pipeline.
async fn ingest(
    State(state): State<IngestState>,
    Json(request): Json<IngestRequest>,
) -> impl IntoResponse {
    match state.producer.ingest(request.user_id, &request.email).await {
        Ok(IngestOutcome::Accepted {
            job_id,
            requires_sandbox,
        }) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "accepted",
                "job_id": job_id,
                "requires_sandbox": requires_sandbox,
            })),
        ),
        Ok(IngestOutcome::Duplicate { existing_id }) => (
            StatusCode::OK,
            Json(json!({
                "status": "duplicate",
                "existing_id": existing_id,
            })),
        ),
        Err(e) => {
            error!(error = %e, "ingest failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "detail": e.to_string() })),
            )
        }
    }
}

/// Router for the producer role: health plus the ingest endpoint.
pub fn ingest_router(producer: Arc<IngestProducer>, service: &'static str) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .with_state(IngestState { producer })
        .merge(health_router(service))
}

#[cfg(test)]
mod tests {
    use super::*;

    use mailward_broker::{MemoryBroker, MessageBroker};
    use mailward_store::{EventStore, MemoryEventStore};

    #[tokio::test]
    async fn health_names_the_service() {
        let server = axum_test::TestServer::new(health_router("aggregator-worker")).unwrap();
        let response = server.get("/health").await;
        response.assert_status_ok();
        response.assert_json(&json!({ "status": "ok", "service": "aggregator-worker" }));
    }

    #[tokio::test]
    async fn ingest_accepts_new_email() {
        let store = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let producer = Arc::new(IngestProducer::new(
            store as Arc<dyn EventStore>,
            broker as Arc<dyn MessageBroker>,
        ));

        let server = axum_test::TestServer::new(ingest_router(producer, "ingest-worker")).unwrap();
        let response = server
            .post("/ingest")
            .json(&json!({
                "user_id": Uuid::new_v4(),
                "email": {
                    "message_id": "gm-api-1",
                    "sender": "sender@example.com",
                    "recipient": "rcpt@example.com",
                    "subject": "hello",
                    "body_preview": "hi there",
                },
            }))
            .await;

        response.assert_status(StatusCode::ACCEPTED);
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["requires_sandbox"], false);
    }

    #[tokio::test]
    async fn ingest_reports_duplicates() {
        let store = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let producer = Arc::new(IngestProducer::new(
            store as Arc<dyn EventStore>,
            broker as Arc<dyn MessageBroker>,
        ));
        let server = axum_test::TestServer::new(ingest_router(producer, "ingest-worker")).unwrap();

        let payload = json!({
            "user_id": Uuid::new_v4(),
            "email": {
                "message_id": "gm-api-dup",
                "sender": "sender@example.com",
                "recipient": "rcpt@example.com",
                "subject": "hello",
                "body_preview": "hi there",
            },
        });

        server.post("/ingest").json(&payload).await.assert_status(StatusCode::ACCEPTED);
        let second = server.post("/ingest").json(&payload).await;
        second.assert_status_ok();
        let body: serde_json::Value = second.json();
        assert_eq!(body["status"], "duplicate");
    }
}
