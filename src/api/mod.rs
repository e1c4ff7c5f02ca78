// API module entry
// xDS-style management API for identities, targets, permissions, routes and stages

mod handlers;
mod response;
mod types;
mod updaters;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request, Response};
use std::convert::Infallible;
use std::sync::Arc;

use crate::config::{AppState, ResourceType};
use crate::http::build_health_response;
use crate::logger;

fn discovery_type(path: &str) -> Option<ResourceType> {
    let plural = path.strip_prefix("/v1/discovery:")?;
    ResourceType::ALL
        .into_iter()
        .find(|resource_type| resource_type.plural() == plural)
}

/// API route handler
///
/// Dispatches to handler functions based on request path and method
pub async fn handle_api_config(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    match (method, path.as_str()) {
        (Method::GET, "/healthz") => Ok(build_health_response("ok")),
        // Get all resources snapshot
        (Method::GET, "/v1/discovery") => handlers::handle_snapshot(state).await,
        // Definitions as a config file
        (Method::GET, "/v1/discovery:export") => handlers::handle_export(state).await,
        // Stage management
        (Method::GET, "/v1/stages") => {
            handlers::handle_stages_get(req.uri().query(), state).await
        }
        (Method::POST, "/v1/stages:deploy") => handlers::handle_deploy(req, state).await,
        (Method::GET, "/v1/deployments") => handlers::handle_deployments_get(state).await,
        // State persistence management
        (Method::GET, "/v1/state") => handlers::handle_state_get(state).await,
        (Method::DELETE, "/v1/state") => handlers::handle_state_clear(state).await,
        (method, p) => match (method, discovery_type(p)) {
            (Method::GET, Some(resource_type)) => {
                handlers::handle_discovery_get(state, resource_type).await
            }
            (Method::POST, Some(resource_type)) => {
                handlers::handle_discovery_post(req, state, resource_type).await
            }
            (method, _) => {
                logger::log_api_request(method.as_str(), &path, 404);
                Ok(response::not_found())
            }
        },
    }
}
