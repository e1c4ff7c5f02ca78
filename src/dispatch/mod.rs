//! Request dispatch
//!
//! Resolves an inbound request to a stage, its active deployment and a
//! route, then hands it to the route's integration. The deployment snapshot
//! taken at the start is used for the whole request, so a concurrent deploy
//! never mixes two route tables.

use hyper::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::gateway::Gateway;
use crate::integration::{self, HandlerResponse, ProxyEvent, RequestEnvelope};
use crate::logger;
use crate::routing::Route;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique id for an inbound request
pub fn next_request_id() -> String {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "{:x}-{:06x}",
        chrono::Utc::now().timestamp_millis(),
        seq & 0x00ff_ffff
    )
}

/// Why an authorized invocation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReason {
    Timeout,
    HandlerError,
    InvalidResponse,
    InvalidRequest,
    ExecutionRole,
    EndpointUnavailable,
}

impl std::fmt::Display for FaultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "Timeout",
            Self::HandlerError => "HandlerError",
            Self::InvalidResponse => "InvalidResponse",
            Self::InvalidRequest => "InvalidRequest",
            Self::ExecutionRole => "ExecutionRole",
            Self::EndpointUnavailable => "EndpointUnavailable",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no route for {method} {path}")]
    NoRoute { method: String, path: String },
    #[error("caller is not permitted to invoke {target}")]
    Forbidden { target: String },
    #[error("invocation target {0} not found")]
    TargetNotFound(String),
    #[error("invocation of {target} failed ({reason}): {detail}")]
    Fault {
        target: String,
        reason: FaultReason,
        detail: String,
    },
}

impl DispatchError {
    pub fn fault(target: &str, reason: FaultReason, detail: impl Into<String>) -> Self {
        Self::Fault {
            target: target.to_string(),
            reason,
            detail: detail.into(),
        }
    }

    /// HTTP status reported to the client
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NoRoute { .. } => StatusCode::NOT_FOUND,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Fault {
                reason: FaultReason::Timeout,
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            Self::TargetNotFound(_) | Self::Fault { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short name for logs and error bodies
    pub fn kind(&self) -> String {
        match self {
            Self::NoRoute { .. } => "NoRoute".to_string(),
            Self::Forbidden { .. } => "Forbidden".to_string(),
            Self::TargetNotFound(_) => "TargetNotFound".to_string(),
            Self::Fault { reason, .. } => reason.to_string(),
        }
    }
}

/// Authorization scope of a request: `{api}/{stage}/{METHOD}{path}`
///
/// The `$default` route is scoped as `{api}/{stage}/$default`.
pub fn source_scope(api_id: &str, stage: &str, method: &str, route: &Route) -> String {
    match route.pattern {
        Some(ref pattern) => format!("{api_id}/{stage}/{method}{}", pattern.as_str()),
        None => format!("{api_id}/{stage}/{}", route.resource_path()),
    }
}

/// A request that reached its target
#[derive(Debug)]
pub struct Dispatched {
    pub response: HandlerResponse,
    pub stage: String,
    pub route_key: String,
    pub deployment_id: u64,
}

/// Dispatch one request through the gateway
pub async fn dispatch(
    gateway: &Gateway,
    request: &RequestEnvelope,
) -> Result<Dispatched, DispatchError> {
    let no_route = || DispatchError::NoRoute {
        method: request.method.to_string(),
        path: request.path.clone(),
    };

    let (stage, path) = gateway
        .stages
        .resolve(&request.path)
        .await
        .ok_or_else(no_route)?;
    let deployment = stage.active().await.ok_or_else(no_route)?;
    let matched = deployment
        .table
        .match_route(&request.method, &path)
        .ok_or_else(no_route)?;
    let route = &matched.route;

    let settings = &gateway.settings;
    logger::log_dispatch(
        &request.request_id,
        &stage.name,
        deployment.id,
        &route.key,
        &route.integration.target.to_string(),
    );

    let event = ProxyEvent::from_request(
        request,
        &route.key,
        matched.path_parameters.clone(),
        &settings.api_id,
        &stage.name,
    );
    let source = source_scope(&settings.api_id, &stage.name, request.method.as_str(), route);

    match integration::invoke(&route.integration, event, &source, &gateway.bindings()).await {
        Ok(response) => Ok(Dispatched {
            response,
            stage: stage.name.clone(),
            route_key: route.key.clone(),
            deployment_id: deployment.id,
        }),
        Err(e) => {
            if let DispatchError::Fault {
                ref target,
                reason,
                ref detail,
            } = e
            {
                logger::log_fault(&request.request_id, target, reason, detail);
            }
            Err(e)
        }
    }
}
