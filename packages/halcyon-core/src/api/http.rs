//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::addons::{AddonInfo, AddonType, AddonUpdate};
use crate::api::response::{api_error, api_ok, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{HubError, HubResult};

/// Service identifier reported by the health endpoint.
const SERVICE_ID: &str = "halcyon-hub";

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct UrlQuery {
    url: String,
}

#[derive(Deserialize)]
struct UrlRequest {
    url: String,
}

#[derive(Deserialize)]
struct RemoveRequest {
    url: String,
    /// Remove a directory instead of a file.
    #[serde(default)]
    directory: bool,
}

#[derive(Deserialize)]
struct AddonListQuery {
    /// Extension point string, e.g. `halcyon.ui.screensaver`.
    #[serde(rename = "type")]
    addon_type: Option<String>,
    enabled: Option<bool>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    // The hub serves LAN clients without credentials, so any origin may read it
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/vfs/browse", get(browse_vfs))
        .route("/api/vfs/exists", get(vfs_exists))
        .route("/api/vfs/mkdir", post(vfs_mkdir))
        .route("/api/vfs", delete(vfs_remove))
        .route("/api/vfs/schemes", get(list_schemes))
        .route("/api/servers", get(list_servers))
        .route("/api/servers/refresh", post(refresh_servers))
        .route("/api/tuners", get(list_tuners))
        .route("/api/tuners/refresh", post(refresh_tuners))
        .route("/api/addons", get(list_addons))
        .route("/api/addons/search", get(search_addons))
        .route("/api/addons/updates", get(list_addon_updates))
        .route("/api/addons/{id}", get(get_addon))
        .route("/api/addons/{id}/enable", post(enable_addon))
        .route("/api/addons/{id}/disable", post(disable_addon))
        .route("/api/repositories/refresh", post(refresh_repositories))
        .route("/api/events", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe: "Is the process running?"
///
/// Always returns 200 OK if the server is responding. Use `/ready` for
/// readiness checks that verify the service can handle requests.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "schemes": state.vfs.schemes(),
    }))
}

/// Readiness probe: "Can the service handle requests?"
///
/// Returns 200 OK only when:
/// - Server port has been assigned (listening)
/// - The add-on database answers queries
///
/// Returns 503 Service Unavailable with details when not ready.
async fn readiness_check(State(state): State<AppState>) -> Response {
    let port = state.port();
    let installed = state.addons.list(None, false).map(|list| list.len()).ok();
    let server_count = state.servers.servers().len();

    let port_ready = port > 0;
    let db_ready = installed.is_some();
    let ready = port_ready && db_ready;

    let status = if ready { "ready" } else { "not_ready" };
    let body = json!({
        "status": status,
        "ready": ready,
        "checks": {
            "port": { "ready": port_ready, "value": port },
            "addonDb": { "ready": db_ready, "installed": installed.unwrap_or(0) },
            "discovery": { "ready": server_count > 0, "info": "optional - media servers discovered" }
        }
    });

    if ready {
        api_success(body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VFS Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/vfs/browse?url=
///
/// Lists a VFS directory, folders first.
async fn browse_vfs(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> HubResult<impl IntoResponse> {
    let mut listing = state.vfs.list(&query.url).await?;
    listing.sort_folders_first();
    Ok(api_success(json!({ "listing": listing })))
}

/// GET /api/vfs/exists?url=
async fn vfs_exists(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> HubResult<impl IntoResponse> {
    let exists = state.vfs.exists(&query.url).await?;
    Ok(api_success(json!({ "url": query.url, "exists": exists })))
}

/// POST /api/vfs/mkdir
async fn vfs_mkdir(
    State(state): State<AppState>,
    Json(payload): Json<UrlRequest>,
) -> HubResult<impl IntoResponse> {
    state.vfs.create_dir(&payload.url).await?;
    Ok(api_ok())
}

/// DELETE /api/vfs
///
/// Removes a file, or an empty directory when `directory` is set.
async fn vfs_remove(
    State(state): State<AppState>,
    Json(payload): Json<RemoveRequest>,
) -> HubResult<impl IntoResponse> {
    if payload.directory {
        state.vfs.remove_dir(&payload.url).await?;
    } else {
        state.vfs.remove_file(&payload.url).await?;
    }
    Ok(api_ok())
}

async fn list_schemes(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "schemes": state.vfs.schemes() }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "servers": state.servers.servers() }))
}

/// Triggers a discovery sweep outside the regular interval.
async fn refresh_servers(State(state): State<AppState>) -> impl IntoResponse {
    state.servers.trigger_refresh();
    api_ok()
}

async fn list_tuners(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "tuners": state.tuners.tuners() }))
}

async fn refresh_tuners(State(state): State<AppState>) -> impl IntoResponse {
    state.tuners.trigger_refresh();
    api_ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Add-on Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Serializes an add-on with its runtime enabled state attached.
fn addon_json(info: &AddonInfo, enabled: bool) -> HubResult<serde_json::Value> {
    let mut value =
        serde_json::to_value(info).map_err(|e| HubError::Internal(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("enabled".to_string(), json!(enabled));
    }
    Ok(value)
}

/// Compact JSON shape for a pending update.
fn update_json(update: &AddonUpdate) -> serde_json::Value {
    json!({
        "id": update.installed.id,
        "name": update.installed.name,
        "installedVersion": update.installed.version,
        "availableVersion": update.available.version,
    })
}

/// GET /api/addons?type=&enabled=
///
/// Lists installed add-ons. `type` narrows by extension point string,
/// `enabled` keeps only enabled (true) or only disabled (false) add-ons.
async fn list_addons(
    State(state): State<AppState>,
    Query(query): Query<AddonListQuery>,
) -> HubResult<impl IntoResponse> {
    let addon_type = query
        .addon_type
        .as_deref()
        .map(AddonType::from_extension_point);
    let addons = state
        .addons
        .list(addon_type.as_ref(), query.enabled == Some(true))?;

    let mut entries = Vec::with_capacity(addons.len());
    for info in addons {
        let enabled = state.addons.is_enabled(&info.id)?;
        if query.enabled == Some(false) && enabled {
            continue;
        }
        entries.push(addon_json(&info, enabled)?);
    }
    Ok(api_success(json!({ "addons": entries })))
}

/// GET /api/addons/search?q=
///
/// Searches repository catalog entries by name or summary. An empty
/// query would match the entire catalog, so it is rejected.
async fn search_addons(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let q = query.q.trim();
    if q.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "invalid_request", "empty search query");
    }

    match state.addons.search(q) {
        Ok(results) => api_success(json!({ "results": results })),
        Err(e) => HubError::from(e).into_response(),
    }
}

/// GET /api/addons/updates
async fn list_addon_updates(State(state): State<AppState>) -> HubResult<impl IntoResponse> {
    let updates = state.addons.outdated()?;
    let entries: Vec<_> = updates.iter().map(update_json).collect();
    Ok(api_success(json!({ "updates": entries })))
}

/// GET /api/addons/{id}
async fn get_addon(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> HubResult<impl IntoResponse> {
    let info = state
        .addons
        .get(&id)
        .ok_or_else(|| HubError::NotFound(format!("Add-on {}", id)))?;
    let enabled = state.addons.is_enabled(&id)?;
    let blocked = state.addons.updates_blocked(&id)?;

    let mut value = addon_json(&info, enabled)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("updatesBlocked".to_string(), json!(blocked));
    }
    Ok(api_success(json!({ "addon": value })))
}

/// POST /api/addons/{id}/enable
async fn enable_addon(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> HubResult<impl IntoResponse> {
    state.addons.set_enabled(&id, true)?;
    Ok(api_ok())
}

/// POST /api/addons/{id}/disable
///
/// Fails with 400 when another enabled add-on requires this one.
async fn disable_addon(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> HubResult<impl IntoResponse> {
    state.addons.set_enabled(&id, false)?;
    Ok(api_ok())
}

/// POST /api/repositories/refresh
///
/// Runs a refresh pass inline and reports the outcome. The background
/// refresh loop keeps its own schedule.
async fn refresh_repositories(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.repositories.refresh_all().await;
    api_success(json!({ "summary": summary }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::addons::parse_addon_xml;

    fn sample_addon() -> AddonInfo {
        parse_addon_xml(
            r#"<addon id="screensaver.dim" name="Dim" version="1.2.0" provider-name="Halcyon">
                 <extension point="halcyon.ui.screensaver" library_linux="dim.so"/>
                 <extension point="halcyon.addon.metadata">
                   <summary>Fade the screen</summary>
                 </extension>
               </addon>"#,
        )
        .unwrap()
    }

    mod addon_handlers {
        use super::*;

        #[test]
        fn addon_json_attaches_enabled_flag() {
            let info = sample_addon();
            let value = addon_json(&info, true).unwrap();
            assert_eq!(value["id"], "screensaver.dim");
            assert_eq!(value["version"], "1.2.0");
            assert_eq!(value["enabled"], true);
        }

        #[test]
        fn addon_json_serializes_type_as_extension_point() {
            let info = sample_addon();
            let value = addon_json(&info, false).unwrap();
            assert_eq!(value["addonType"], "halcyon.ui.screensaver");
            assert_eq!(value["enabled"], false);
        }

        #[test]
        fn list_query_maps_type_to_extension_point() {
            let query: AddonListQuery = serde_json::from_value(serde_json::json!({
                "type": "halcyon.pvr.client",
                "enabled": true
            }))
            .unwrap();
            let addon_type = query
                .addon_type
                .as_deref()
                .map(AddonType::from_extension_point);
            assert_eq!(addon_type, Some(AddonType::PvrClient));
            assert_eq!(query.enabled, Some(true));
        }

        #[test]
        fn list_query_unknown_point_is_preserved() {
            let addon_type = AddonType::from_extension_point("halcyon.audio.decoder");
            assert_eq!(
                addon_type,
                AddonType::Unknown("halcyon.audio.decoder".to_string())
            );
        }
    }

    mod vfs_handlers {
        use super::*;

        #[test]
        fn remove_request_defaults_to_file() {
            let req: RemoveRequest =
                serde_json::from_str(r#"{"url": "local:///tmp/song.flac"}"#).unwrap();
            assert!(!req.directory);
        }

        #[test]
        fn remove_request_directory_flag() {
            let req: RemoveRequest =
                serde_json::from_str(r#"{"url": "local:///tmp/music", "directory": true}"#)
                    .unwrap();
            assert!(req.directory);
        }
    }

    mod response_helpers {
        use super::*;

        #[test]
        fn api_error_carries_status_code() {
            let response = api_error(StatusCode::BAD_REQUEST, "invalid_request", "bad url");
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        #[test]
        fn api_ok_is_200() {
            assert_eq!(api_ok().status(), StatusCode::OK);
        }
    }
}
