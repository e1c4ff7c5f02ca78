//! Management API handlers
//!
//! Discovery reads and updates per resource type, plus stage, deployment
//! and state endpoints.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

use super::response::{bad_request, conflict_response, json_response, toml_response};
use super::types::{
    DeployRequest, DeploymentView, DiscoveryResponse, Resource, RouteUpdateRequest,
    SnapshotResponse, StageView, UpdateRequest,
};
use super::updaters::{self, UpdateError};
use crate::config::{self, AppState, ResourceType};
use crate::gateway::GatewayError;
use crate::logger;

fn type_url(resource_type: ResourceType) -> String {
    format!("type.lambda-dispatch.io/{resource_type}")
}

fn discovery_path(resource_type: ResourceType) -> String {
    format!("/v1/discovery:{}", resource_type.plural())
}

fn to_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        logger::log_api_error(&format!("Failed to serialize resource: {e}"));
        serde_json::json!({"error": "serialization_failed"})
    })
}

/// Current resources of one type
async fn collect_resources(state: &AppState, resource_type: ResourceType) -> Vec<Resource> {
    let gateway = &state.gateway;
    let url = type_url(resource_type);
    let resource = |name: String, mut value: serde_json::Value| {
        if let Some(fields) = value.as_object_mut() {
            fields.remove("name");
        }
        Resource {
            type_url: url.clone(),
            name,
            value,
        }
    };

    match resource_type {
        ResourceType::Identity => gateway
            .identities
            .list()
            .await
            .iter()
            .map(|identity| resource(identity.name.clone(), to_value(&**identity)))
            .collect(),
        ResourceType::Target => gateway
            .targets
            .list()
            .await
            .iter()
            .map(|target| {
                resource(
                    target.qualified_name(),
                    serde_json::json!({
                        "version": target.version,
                        "endpoint": target.endpoint,
                        "identity": target.identity.name,
                    }),
                )
            })
            .collect(),
        ResourceType::Permission => gateway
            .policy
            .statements()
            .await
            .iter()
            .map(|statement| resource(statement.sid.clone(), to_value(statement)))
            .collect(),
        ResourceType::Route => {
            let definitions = gateway.export().await;
            let integrations = definitions.integrations.iter().map(|integration| Resource {
                type_url: format!("{url}/INTEGRATION"),
                name: integration.id.clone(),
                value: to_value(integration),
            });
            definitions
                .routes
                .iter()
                .map(|route| resource(format!("{} {}", route.method, route.path), to_value(route)))
                .chain(integrations)
                .collect()
        }
        ResourceType::Stage => stage_views(state)
            .await
            .into_iter()
            .map(|view| resource(view.name.clone(), to_value(&view)))
            .collect(),
    }
}

async fn stage_views(state: &AppState) -> Vec<StageView> {
    let mut views = Vec::new();
    for stage in state.gateway.stages.stages().await {
        views.push(StageView {
            name: stage.name.clone(),
            auto_deploy: stage.auto_deploy,
            active_deployment: stage.active().await.map(|d| d.id),
        });
    }
    views.sort_by(|a, b| a.name.cmp(&b.name));
    views
}

async fn discovery_response(state: &AppState, resource_type: ResourceType) -> DiscoveryResponse {
    let (version, nonce) = state.xds_versions.get_version(resource_type);
    DiscoveryResponse {
        version_info: version.to_string(),
        resources: collect_resources(state, resource_type).await,
        nonce: nonce.to_string(),
        type_url: type_url(resource_type),
    }
}

/// Get all resources snapshot
pub async fn handle_snapshot(state: Arc<AppState>) -> Result<Response<Full<Bytes>>, Infallible> {
    let mut resources = Vec::with_capacity(ResourceType::ALL.len());
    for resource_type in ResourceType::ALL {
        resources.push(discovery_response(&state, resource_type).await);
    }

    let snapshot = SnapshotResponse {
        version_info: state.xds_versions.max_version().to_string(),
        requests_served: state
            .requests_served
            .load(std::sync::atomic::Ordering::Relaxed),
        resources,
    };

    logger::log_api_request("GET", "/v1/discovery", 200);
    json_response(StatusCode::OK, &snapshot)
}

/// GET method to fetch resources of one type
pub async fn handle_discovery_get(
    state: Arc<AppState>,
    resource_type: ResourceType,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = discovery_response(&state, resource_type).await;
    logger::log_api_request("GET", &discovery_path(resource_type), 200);
    json_response(StatusCode::OK, &response)
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, String> {
    let body = req
        .collect()
        .await
        .map_err(|_| "Failed to read request body".to_string())?
        .to_bytes();
    serde_json::from_slice(&body).map_err(|e| format!("Invalid JSON: {e}"))
}

/// Reject an update made against a stale version
fn check_version(
    state: &AppState,
    resource_type: ResourceType,
    version_info: &str,
) -> Option<String> {
    if version_info.is_empty() {
        return None;
    }
    let (current_version, _) = state.xds_versions.get_version(resource_type);
    (version_info != current_version.to_string()).then(|| {
        format!("Version conflict: expected {current_version}, got {version_info}")
    })
}

/// POST method to update resources (xDS standard)
pub async fn handle_discovery_post(
    req: Request<Incoming>,
    state: Arc<AppState>,
    resource_type: ResourceType,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = discovery_path(resource_type);

    let result = if resource_type == ResourceType::Route {
        let update: RouteUpdateRequest = match read_json(req).await {
            Ok(u) => u,
            Err(e) => {
                logger::log_api_request("POST", &path, 400);
                return Ok(bad_request(&e));
            }
        };
        if let Some(conflict) = check_version(&state, resource_type, &update.version_info) {
            logger::log_api_request("POST", &path, 409);
            return Ok(conflict_response(&conflict));
        }
        updaters::update_routes(&state, update).await
    } else {
        let update: UpdateRequest = match read_json(req).await {
            Ok(u) => u,
            Err(e) => {
                logger::log_api_request("POST", &path, 400);
                return Ok(bad_request(&e));
            }
        };
        if let Some(conflict) = check_version(&state, resource_type, &update.version_info) {
            logger::log_api_request("POST", &path, 409);
            return Ok(conflict_response(&conflict));
        }
        apply_update(&state, resource_type, &update).await
    };

    Ok(finish_update(&state, resource_type, &path, result).await)
}

async fn apply_update(
    state: &AppState,
    resource_type: ResourceType,
    update: &UpdateRequest,
) -> Result<String, UpdateError> {
    match resource_type {
        ResourceType::Identity => updaters::update_identities(state, update).await,
        ResourceType::Target => updaters::update_targets(state, update).await,
        ResourceType::Permission => updaters::update_permissions(state, update).await,
        ResourceType::Stage => updaters::update_stages(state, update).await,
        ResourceType::Route => Err(UpdateError::Invalid(
            "Route updates carry routes and integrations".to_string(),
        )),
    }
}

/// Turn an update result into an ACK/NACK, bumping versions when anything changed
async fn finish_update(
    state: &AppState,
    resource_type: ResourceType,
    path: &str,
    result: Result<String, UpdateError>,
) -> Response<Full<Bytes>> {
    match result {
        Ok(message) => {
            let (new_version, new_nonce) = state.record_change(resource_type).await;
            logger::log_api_request("POST", path, 200);

            let response = serde_json::json!({
                "status": "ACK",
                "version_info": new_version.to_string(),
                "nonce": new_nonce.to_string(),
                "message": message
            });
            json_response(StatusCode::OK, &response).unwrap_or_else(|never| match never {})
        }
        Err(UpdateError::Invalid(message)) => {
            logger::log_api_request("POST", path, 400);
            bad_request(&message)
        }
        Err(UpdateError::Rejected { applied, error }) => {
            let message = if applied > 0 {
                state.record_change(resource_type).await;
                format!("{error} ({applied} earlier record(s) applied)")
            } else {
                error.to_string()
            };
            nack_for(&error, path, &message)
        }
    }
}

fn nack_for(error: &GatewayError, path: &str, message: &str) -> Response<Full<Bytes>> {
    if error.is_conflict() {
        logger::log_api_request("POST", path, 409);
        conflict_response(message)
    } else {
        logger::log_api_request("POST", path, 400);
        bad_request(message)
    }
}

/// Point a stage at a deployment
pub async fn handle_deploy(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    const PATH: &str = "/v1/stages:deploy";

    let request: DeployRequest = match read_json(req).await {
        Ok(r) => r,
        Err(e) => {
            logger::log_api_request("POST", PATH, 400);
            return Ok(bad_request(&e));
        }
    };

    match state.gateway.deploy(&request.stage, request.deployment_id).await {
        Ok(deployment) => {
            let (version, nonce) = state.record_change(ResourceType::Stage).await;
            logger::log_api_request("POST", PATH, 200);
            json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "status": "ACK",
                    "version_info": version.to_string(),
                    "nonce": nonce.to_string(),
                    "message": format!("Stage {} now serves deployment {}", request.stage, deployment.id),
                }),
            )
        }
        Err(e) => Ok(nack_for(&e, PATH, &e.to_string())),
    }
}

/// All stages, or one with `?name=`
pub async fn handle_stages_get(
    query: Option<&str>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let name = query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == "name")
            .map(|(_, value)| value.into_owned())
    });

    let Some(name) = name else {
        let views = stage_views(&state).await;
        logger::log_api_request("GET", "/v1/stages", 200);
        return json_response(StatusCode::OK, &views);
    };

    let stages = &state.gateway.stages;
    match stages.get_active(&name).await {
        Ok(active) => {
            let auto_deploy = stages.stage(&name).await.is_ok_and(|s| s.auto_deploy);
            logger::log_api_request("GET", "/v1/stages", 200);
            json_response(
                StatusCode::OK,
                &StageView {
                    name,
                    auto_deploy,
                    active_deployment: active.map(|d| d.id),
                },
            )
        }
        Err(e) => {
            logger::log_api_request("GET", "/v1/stages", 404);
            json_response(
                StatusCode::NOT_FOUND,
                &serde_json::json!({ "status": "NACK", "error_detail": { "code": 404, "message": e.to_string() } }),
            )
        }
    }
}

/// Deployment history, oldest first
pub async fn handle_deployments_get(
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let stages = stage_views(&state).await;
    let views: Vec<DeploymentView> = state
        .gateway
        .stages
        .deployments()
        .await
        .iter()
        .map(|deployment| DeploymentView {
            id: deployment.id,
            created_at: deployment.created_at,
            description: deployment.description.clone(),
            routes: deployment.table.routes().map(|r| r.key.clone()).collect(),
            stages: stages
                .iter()
                .filter(|s| s.active_deployment == Some(deployment.id))
                .map(|s| s.name.clone())
                .collect(),
        })
        .collect();

    logger::log_api_request("GET", "/v1/deployments", 200);
    json_response(StatusCode::OK, &views)
}

/// Current definitions in config file syntax
pub async fn handle_export(state: Arc<AppState>) -> Result<Response<Full<Bytes>>, Infallible> {
    const PATH: &str = "/v1/discovery:export";
    let definitions = state.gateway.export().await;
    match config::to_toml(&definitions) {
        Ok(text) => {
            logger::log_api_request("GET", PATH, 200);
            Ok(toml_response(text))
        }
        Err(e) => {
            logger::log_api_error(&e);
            logger::log_api_request("GET", PATH, 500);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({ "error": e }),
            )
        }
    }
}

/// Persistence status
pub async fn handle_state_get(state: Arc<AppState>) -> Result<Response<Full<Bytes>>, Infallible> {
    let manager = &state.state_manager;
    let body = serde_json::json!({
        "enabled": manager.is_enabled(),
        "state_file": manager.state_path().display().to_string(),
        "exists": manager.state_path().exists(),
    });
    logger::log_api_request("GET", "/v1/state", 200);
    json_response(StatusCode::OK, &body)
}

/// Delete the state file; the running gateway is unchanged
pub async fn handle_state_clear(state: Arc<AppState>) -> Result<Response<Full<Bytes>>, Infallible> {
    match state.state_manager.clear().await {
        Ok(()) => {
            logger::log_api_request("DELETE", "/v1/state", 200);
            json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "status": "ACK",
                    "message": "State file removed; the config file applies on next start"
                }),
            )
        }
        Err(e) => {
            logger::log_api_error(&e);
            logger::log_api_request("DELETE", "/v1/state", 500);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({ "status": "NACK", "error_detail": { "code": 500, "message": e } }),
            )
        }
    }
}
