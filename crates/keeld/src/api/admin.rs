//! Administrative REST API.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use keel::{BackendConfig, BackendType, Volume};
use keel_common::{ErrorKind, FieldError, KeelError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::AppState;

/// Admin API routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/volumes", get(list_volumes).post(create_volume))
        .route("/volumes/{name}", get(get_volume).delete(delete_volume))
}

/// Body of `POST /volumes`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateVolumeRequest {
    name: String,
    #[serde(rename = "type")]
    backend: String,
    #[serde(default)]
    config: Option<Value>,
}

#[derive(Debug, Serialize)]
struct VolumeBody {
    name: String,
    mountpoint: String,
    #[serde(rename = "type")]
    backend: BackendType,
    created_at: String,
}

impl From<&Volume> for VolumeBody {
    fn from(volume: &Volume) -> Self {
        Self {
            name: volume.name.to_string(),
            mountpoint: volume.host_path.to_string_lossy().into_owned(),
            backend: volume.backend_type(),
            created_at: volume.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: String,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    errors: &'a [FieldError],
}

/// A [`KeelError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(KeelError);

impl From<KeelError> for ApiError {
    fn from(err: KeelError) -> Self {
        Self(err)
    }
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Backend | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Admin request failed");
        } else {
            tracing::debug!(error = %self.0, "Admin request rejected");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            errors: self.0.field_errors(),
        };
        (status, Json(body)).into_response()
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_volumes(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let volumes = state.controller.list().await?;
    let body: Vec<VolumeBody> = volumes.iter().map(VolumeBody::from).collect();
    Ok(Json(json!({ "volumes": body })))
}

async fn create_volume(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<VolumeBody>), ApiError> {
    let request: CreateVolumeRequest = serde_json::from_slice(&body)
        .map_err(|e| KeelError::field("body", "format", format!("invalid request body: {e}")))?;

    let backend: BackendType = request.backend.parse()?;
    let config = BackendConfig::decode(backend, request.config.as_ref())?;
    let volume = state.controller.create(&request.name, config).await?;

    tracing::info!(name = %volume.name, backend = %backend, "Volume created via admin API");
    Ok((StatusCode::CREATED, Json(VolumeBody::from(&volume))))
}

async fn get_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<VolumeBody>, ApiError> {
    let volume = state.controller.get(&name).await?;
    Ok(Json(VolumeBody::from(&volume)))
}

async fn delete_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.controller.remove(&name).await?;
    Ok(Json(json!({ "message": format!("Volume '{name}' removed") })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::admin_app;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use keel::mount::testing::RecordingMount;
    use keel::{BackendRegistry, LifecycleController, MemoryRegistry};
    use keel_common::KeelPaths;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _dir: TempDir,
        mount: Arc<RecordingMount>,
        app: Router,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mount = Arc::new(RecordingMount::new());
            let controller = LifecycleController::new(
                Arc::new(MemoryRegistry::new()),
                BackendRegistry::standard(mount.clone(), false),
                KeelPaths::with_root(dir.path()).with_host_volumes("/host/volumes"),
            );
            Self {
                _dir: dir,
                mount,
                app: admin_app(AppState::new(Arc::new(controller))),
            }
        }

        async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
                .unwrap();
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    #[tokio::test]
    async fn health() {
        let harness = Harness::new();
        let (status, body) = harness.send("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn create_get_list_delete() {
        let harness = Harness::new();

        let (status, body) = harness
            .send("POST", "/volumes", Some(json!({ "name": "data", "type": "local" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "data");
        assert_eq!(body["type"], "local");
        assert_eq!(body["mountpoint"], "/host/volumes/data/_data");

        let (status, body) = harness.send("GET", "/volumes/data", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "data");

        let (status, body) = harness.send("GET", "/volumes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["volumes"].as_array().unwrap().len(), 1);

        let (status, body) = harness.send("DELETE", "/volumes/data", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Volume 'data' removed");

        let (status, _) = harness.send("GET", "/volumes/data", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn nfs_volume_is_attached() {
        let harness = Harness::new();
        let request = json!({
            "name": "media",
            "type": "nfs",
            "config": {
                "server": "10.0.0.5",
                "exportPath": "/export/media",
                "version": "3",
                "port": 2049,
                "readOnly": true
            }
        });

        let (status, body) = harness.send("POST", "/volumes", Some(request)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["type"], "nfs");

        let mounts = harness.mount.mounts();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].fstype, "nfs");
        assert!(mounts[0].options.contains(&"ro".to_string()));
    }

    #[tokio::test]
    async fn validation_errors_list_every_field() {
        let harness = Harness::new();
        let request = json!({
            "name": "media",
            "type": "nfs",
            "config": { "server": "", "version": "5" }
        });

        let (status, body) = harness.send("POST", "/volumes", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"server"));
        assert!(fields.contains(&"exportPath"));
        assert!(fields.contains(&"version"));
        assert!(fields.contains(&"port"));
        assert!(harness.mount.mounts().is_empty());
    }

    #[tokio::test]
    async fn rejected_requests() {
        let harness = Harness::new();

        let (status, body) = harness
            .send("POST", "/volumes", Some(json!({ "name": "x", "type": "tape" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["field"], "type");

        let (status, _) = harness
            .send(
                "POST",
                "/volumes",
                Some(json!({ "name": "x", "type": "local", "extra": 1 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = harness
            .send("POST", "/volumes", Some(json!({ "name": "Bad Name", "type": "local" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("errors").is_none());

        let (status, _) = harness
            .send("POST", "/volumes", Some(json!({ "name": "share", "type": "smb" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = harness.send("DELETE", "/volumes/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let harness = Harness::new();
        let request = json!({ "name": "data", "type": "local" });

        let (status, _) = harness.send("POST", "/volumes", Some(request.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = harness.send("POST", "/volumes", Some(request)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Volume 'data' already exists");
    }

    #[tokio::test]
    async fn mount_failure_is_a_server_error() {
        let harness = Harness::new();
        harness.mount.fail_mounts("connection refused");
        let request = json!({
            "name": "media",
            "type": "nfs",
            "config": { "server": "nas", "exportPath": "/x", "version": "4", "port": 2049 }
        });

        let (status, body) = harness.send("POST", "/volumes", Some(request)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("connection refused"));
    }
}
