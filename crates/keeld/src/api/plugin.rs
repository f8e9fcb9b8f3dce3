//! Volume plugin protocol.
//!
//! Every endpoint answers HTTP 200; failures are reported in the `Err` field.
//! Request bodies are decoded regardless of their declared content type and
//! an empty body is treated as an empty request.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use keel::{BackendConfig, Volume};
use keel_common::KeelError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::AppState;

/// Plugin protocol routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct NameRequest {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct CreateRequest {
    name: String,
    opts: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MountRequest {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ErrResponse {
    err: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MountpointResponse {
    mountpoint: String,
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeInfo {
    name: String,
    mountpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

impl VolumeInfo {
    fn summary(volume: &Volume) -> Self {
        Self {
            name: volume.name.to_string(),
            mountpoint: volume.host_path.to_string_lossy().into_owned(),
            created_at: None,
        }
    }

    fn detailed(volume: &Volume) -> Self {
        Self {
            created_at: Some(volume.created_at_string()),
            ..Self::summary(volume)
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<VolumeInfo>,
    err: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListResponse {
    volumes: Vec<VolumeInfo>,
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesResponse {
    capabilities: CapabilitiesBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesBody {
    scope: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActivateResponse {
    implements: Vec<&'static str>,
}

fn decode<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| format!("invalid request body: {e}"))
}

fn report(operation: &str, err: &KeelError) -> String {
    tracing::warn!(operation, error = %err, "Plugin request failed");
    err.to_string()
}

async fn activate(State(state): State<AppState>) -> Json<ActivateResponse> {
    Json(ActivateResponse {
        implements: state.controller.activate().to_vec(),
    })
}

async fn capabilities(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: CapabilitiesBody {
            scope: state.controller.capabilities().scope,
        },
    })
}

async fn create(State(state): State<AppState>, body: Bytes) -> Json<ErrResponse> {
    let request: CreateRequest = match decode(&body) {
        Ok(request) => request,
        Err(err) => return Json(ErrResponse { err }),
    };

    let result = match BackendConfig::from_options(&request.opts.unwrap_or_default()) {
        Ok(config) => state.controller.create(&request.name, config).await.map(|_| ()),
        Err(e) => Err(e),
    };

    Json(ErrResponse {
        err: result.err().map(|e| report("create", &e)).unwrap_or_default(),
    })
}

async fn remove(State(state): State<AppState>, body: Bytes) -> Json<ErrResponse> {
    let request: NameRequest = match decode(&body) {
        Ok(request) => request,
        Err(err) => return Json(ErrResponse { err }),
    };

    Json(ErrResponse {
        err: state
            .controller
            .remove(&request.name)
            .await
            .err()
            .map(|e| report("remove", &e))
            .unwrap_or_default(),
    })
}

async fn mount(State(state): State<AppState>, body: Bytes) -> Json<MountpointResponse> {
    let request: MountRequest = match decode(&body) {
        Ok(request) => request,
        Err(err) => return Json(MountpointResponse { err, ..Default::default() }),
    };

    Json(match state.controller.mount(&request.name, &request.id).await {
        Ok(path) => MountpointResponse {
            mountpoint: path.to_string_lossy().into_owned(),
            err: String::new(),
        },
        Err(e) => MountpointResponse {
            err: report("mount", &e),
            ..Default::default()
        },
    })
}

async fn path(State(state): State<AppState>, body: Bytes) -> Json<MountpointResponse> {
    let request: NameRequest = match decode(&body) {
        Ok(request) => request,
        Err(err) => return Json(MountpointResponse { err, ..Default::default() }),
    };

    Json(match state.controller.path(&request.name).await {
        Ok(path) => MountpointResponse {
            mountpoint: path.to_string_lossy().into_owned(),
            err: String::new(),
        },
        Err(e) => MountpointResponse {
            err: report("path", &e),
            ..Default::default()
        },
    })
}

async fn unmount(State(state): State<AppState>, body: Bytes) -> Json<ErrResponse> {
    let request: MountRequest = match decode(&body) {
        Ok(request) => request,
        Err(err) => return Json(ErrResponse { err }),
    };

    Json(ErrResponse {
        err: state
            .controller
            .unmount(&request.name, &request.id)
            .await
            .err()
            .map(|e| report("unmount", &e))
            .unwrap_or_default(),
    })
}

async fn get(State(state): State<AppState>, body: Bytes) -> Json<GetResponse> {
    let request: NameRequest = match decode(&body) {
        Ok(request) => request,
        Err(err) => return Json(GetResponse { volume: None, err }),
    };

    Json(match state.controller.get(&request.name).await {
        Ok(volume) => GetResponse {
            volume: Some(VolumeInfo::detailed(&volume)),
            err: String::new(),
        },
        Err(e) => GetResponse {
            volume: None,
            err: report("get", &e),
        },
    })
}

async fn list(State(state): State<AppState>) -> Json<ListResponse> {
    Json(match state.controller.list().await {
        Ok(volumes) => ListResponse {
            volumes: volumes.iter().map(VolumeInfo::summary).collect(),
            err: String::new(),
        },
        Err(e) => ListResponse {
            volumes: Vec::new(),
            err: report("list", &e),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::plugin_app;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use keel::mount::testing::RecordingMount;
    use keel::{BackendRegistry, LifecycleController, MemoryRegistry};
    use keel_common::KeelPaths;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir) -> Router {
        let controller = LifecycleController::new(
            Arc::new(MemoryRegistry::new()),
            BackendRegistry::standard(Arc::new(RecordingMount::new()), false),
            KeelPaths::with_root(dir.path()).with_host_volumes("/host/volumes"),
        );
        plugin_app(AppState::new(Arc::new(controller)))
    }

    async fn call(app: &Router, endpoint: &str, body: &str) -> Value {
        let response = app
            .clone()
            .oneshot(
                Request::post(endpoint)
                    .header("content-type", "application/vnd.docker.plugins.v1.2+json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn handshake() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        assert_eq!(
            call(&app, "/Plugin.Activate", "").await,
            json!({ "Implements": ["VolumeDriver"] })
        );
        assert_eq!(
            call(&app, "/VolumeDriver.Capabilities", "").await,
            json!({ "Capabilities": { "Scope": true } })
        );
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let created = call(&app, "/VolumeDriver.Create", r#"{"Name":"data","Opts":{}}"#).await;
        assert_eq!(created, json!({ "Err": "" }));

        let mounted = call(&app, "/VolumeDriver.Mount", r#"{"Name":"data","ID":"abc"}"#).await;
        assert_eq!(
            mounted,
            json!({ "Mountpoint": "/host/volumes/data/_data", "Err": "" })
        );

        let path = call(&app, "/VolumeDriver.Path", r#"{"Name":"data"}"#).await;
        assert_eq!(path["Mountpoint"], "/host/volumes/data/_data");

        let got = call(&app, "/VolumeDriver.Get", r#"{"Name":"data"}"#).await;
        assert_eq!(got["Err"], "");
        assert_eq!(got["Volume"]["Name"], "data");
        let created_at = got["Volume"]["CreatedAt"].as_str().unwrap();
        assert_eq!(created_at.len(), "2024-01-01T00:00:00Z".len());
        assert!(created_at.ends_with('Z'));

        let listed = call(&app, "/VolumeDriver.List", "").await;
        assert_eq!(
            listed,
            json!({
                "Volumes": [{ "Name": "data", "Mountpoint": "/host/volumes/data/_data" }],
                "Err": ""
            })
        );

        let unmounted = call(&app, "/VolumeDriver.Unmount", r#"{"Name":"data","ID":"abc"}"#).await;
        assert_eq!(unmounted, json!({ "Err": "" }));

        let removed = call(&app, "/VolumeDriver.Remove", r#"{"Name":"data"}"#).await;
        assert_eq!(removed, json!({ "Err": "" }));

        let listed = call(&app, "/VolumeDriver.List", "").await;
        assert_eq!(listed["Volumes"], json!([]));
    }

    #[tokio::test]
    async fn failures_are_reported_in_band() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let missing = call(&app, "/VolumeDriver.Path", r#"{"Name":"ghost"}"#).await;
        assert_eq!(missing["Mountpoint"], "");
        assert_eq!(missing["Err"], "Volume 'ghost' not found");

        let bad_name = call(&app, "/VolumeDriver.Create", r#"{"Name":"My Volume"}"#).await;
        assert!(bad_name["Err"].as_str().unwrap().contains("my-volume"));

        let bad_body = call(&app, "/VolumeDriver.Create", "{not json").await;
        assert!(!bad_body["Err"].as_str().unwrap().is_empty());

        let get = call(&app, "/VolumeDriver.Get", r#"{"Name":"ghost"}"#).await;
        assert!(get.get("Volume").is_none());
        assert!(!get["Err"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_with_nfs_options() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let body = json!({
            "Name": "media",
            "Opts": {
                "type": "nfs",
                "server": "nas.local",
                "exportPath": "/export/media",
                "version": "4",
                "port": "2049"
            }
        });
        let created = call(&app, "/VolumeDriver.Create", &body.to_string()).await;
        assert_eq!(created, json!({ "Err": "" }));

        let invalid = json!({ "Name": "other", "Opts": { "type": "nfs", "server": "nas" } });
        let failed = call(&app, "/VolumeDriver.Create", &invalid.to_string()).await;
        let err = failed["Err"].as_str().unwrap();
        assert!(err.contains("exportPath"));
        assert!(err.contains("port"));

        let smb = json!({
            "Name": "share",
            "Opts": { "type": "smb", "server": "nas.local", "share": "media" }
        });
        let failed = call(&app, "/VolumeDriver.Create", &smb.to_string()).await;
        assert!(failed["Err"].as_str().unwrap().contains("Unsupported backend"));
    }
}
