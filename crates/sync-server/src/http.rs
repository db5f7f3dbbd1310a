use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use sync_bus::topics;
use sync_store::StateStore;
use sync_types::{Destination, Envelope, RawActivityMessage, Source, StandardizedActivity};
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/ingest/{source}", post(ingest))
        .route("/pipeline-runs/{user_id}/{run_id}", get(get_pipeline_run))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct IngestBody {
    user_id: String,
    activity: StandardizedActivity,
    #[serde(default)]
    pipeline_execution_id: Option<String>,
}

/// Stands in for the out-of-scope webhook / signature-verification
/// frontend: accepts a pre-normalized activity and publishes it to
/// `raw-activity`, after a bounceback check (spec section 4.4) for sources
/// that double as a destination — a webhook fired by our own prior upload
/// must not be re-admitted.
async fn ingest(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Json(body): Json<IngestBody>,
) -> Result<impl IntoResponse, StatusCode> {
    let parsed_source = parse_source(&source).ok_or(StatusCode::NOT_FOUND)?;
    if body.activity.source != parsed_source {
        return Err(StatusCode::BAD_REQUEST);
    }

    if let Some(destination) = bounceback_destination(parsed_source) {
        if state
            .is_bounceback(&body.user_id, destination, &body.activity.external_id)
            .await
        {
            state
                .store
                .increment_counter(&body.user_id, "prevented_sync", 1)
                .await;
            return Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": false, "bounceback": true }))));
        }
    }

    let mut message = RawActivityMessage::new(body.user_id, body.activity);
    message.pipeline_execution_id = body.pipeline_execution_id;

    let envelope: sync_bus::BusEnvelope = Envelope::new(
        "com.fitglue.ingest.received",
        format!("http/ingest/{source}"),
        serde_json::to_value(&message).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );
    state
        .bus
        .publish(topics::RAW_ACTIVITY, envelope)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}

fn parse_source(raw: &str) -> Option<Source> {
    match raw {
        "strava" => Some(Source::Strava),
        "garmin" => Some(Source::Garmin),
        "polar" => Some(Source::Polar),
        "suunto" => Some(Source::Suunto),
        "coros" => Some(Source::Coros),
        "manual_upload" | "manual-upload" => Some(Source::ManualUpload),
        _ => None,
    }
}

/// Sources that are also a destination a pipeline can write to: a webhook
/// pushed from one of these can be our own prior upload bouncing back.
/// Other sources have no corresponding destination, so no self-loop exists.
fn bounceback_destination(source: Source) -> Option<Destination> {
    match source {
        Source::Strava => Some(Destination::Strava),
        _ => None,
    }
}

async fn get_pipeline_run(
    State(state): State<AppState>,
    Path((_user_id, run_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let run = state
        .store
        .get_pipeline_run(&run_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(run))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use sync_bus::BroadcastBus;
    use sync_store::{FsArtifactStore, JsonFileStore};
    use tower::ServiceExt;

    async fn harness() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::new(dir.path().join("state")).await.unwrap());
        let artifacts = std::sync::Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
        let bus = std::sync::Arc::new(BroadcastBus::new());
        (dir, AppState::new(bus, store, artifacts))
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (_dir, state) = harness().await;
        let app = app_router(state);
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ingest_publishes_to_raw_activity() {
        let (_dir, state) = harness().await;
        let mut subscription = state.bus.subscribe(topics::RAW_ACTIVITY);
        let app = app_router(state);

        let body = json!({
            "user_id": "u-1",
            "activity": {
                "external_id": "ext-1",
                "start_time": chrono::Utc::now().to_rfc3339(),
                "type": "run",
                "source": "strava",
            },
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/strava")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        subscription.recv().await.expect("raw-activity delivery");
    }

    #[tokio::test]
    async fn bounceback_within_window_is_not_admitted_and_counts_prevented_sync() {
        let (_dir, state) = harness().await;
        state
            .store
            .put_uploaded_activity(sync_types::UploadedActivityRecord {
                user_id: "u-1".to_string(),
                destination: Destination::Strava,
                destination_id: "ext-1".to_string(),
                source: Source::Strava,
                external_id: "ext-1".to_string(),
                start_time: chrono::Utc::now(),
                uploaded_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let mut subscription = state.bus.subscribe(topics::RAW_ACTIVITY);
        let app = app_router(state.clone());

        let body = json!({
            "user_id": "u-1",
            "activity": {
                "external_id": "ext-1",
                "start_time": chrono::Utc::now().to_rfc3339(),
                "type": "run",
                "source": "strava",
            },
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/strava")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let no_publish = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            subscription.recv(),
        )
        .await;
        assert!(no_publish.is_err(), "no raw-activity publish expected");
        let prevented = state.store.increment_counter("u-1", "prevented_sync", 0).await;
        assert_eq!(prevented, 1);
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let (_dir, state) = harness().await;
        let app = app_router(state);
        let body = json!({
            "user_id": "u-1",
            "activity": {
                "external_id": "ext-1",
                "start_time": chrono::Utc::now().to_rfc3339(),
                "type": "run",
                "source": "strava",
            },
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/not-a-real-source")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_pipeline_run_is_not_found() {
        let (_dir, state) = harness().await;
        let app = app_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/pipeline-runs/u-1/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
