//! Logger module
//!
//! Named log functions for the gateway, backed by `tracing`:
//! - Server lifecycle logging
//! - Dispatch, authorization and fault logging
//! - Access logging with multiple formats
//! - Management API and resource change logging

mod format;

pub use format::AccessLogEntry;

use std::net::SocketAddr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::dispatch::FaultReason;

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `logging.level` when set. Should be
/// called once at application startup.
pub fn init(config: &Config) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
}

pub fn log_server_start(app_addr: &SocketAddr, api_addr: &SocketAddr, config: &Config) {
    tracing::info!("======================================");
    tracing::info!("Gateway started");
    tracing::info!("Listening on: http://{app_addr}");
    tracing::info!("Management API on: http://{api_addr}");
    tracing::info!("API id: {}", config.gateway.api_id);
    tracing::info!("Log level: {}", config.logging.level);
    if let Some(workers) = config.server.workers {
        tracing::info!("Worker threads: {workers}");
    }
    if let Some(max) = config.performance.max_connections {
        tracing::info!("Max connections: {max}");
    }
    tracing::info!("Max body size: {} bytes", config.http.max_body_size);
    tracing::info!("======================================");
}

pub fn log_shutdown() {
    tracing::info!("Shutdown requested, no longer accepting connections");
}

pub fn log_reload(path: &str) {
    tracing::info!(config = path, "Reloading route definitions");
}

pub fn log_connection_accepted(peer_addr: &SocketAddr) {
    tracing::debug!("[Connection] Accepted from: {peer_addr}");
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    tracing::error!("Failed to serve connection: {err:?}");
}

pub fn log_error(message: &str) {
    tracing::error!("{message}");
}

pub fn log_api_error(message: &str) {
    tracing::error!(target: "api", "{message}");
}

pub fn log_warning(message: &str) {
    tracing::warn!("{message}");
}

pub fn log_headers_count(count: usize, show: bool) {
    if show {
        tracing::info!("[Headers] Count: {count}");
    }
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    tracing::info!(target: "access", "{}", entry.format(format));
}

pub fn log_api_request(method: &str, path: &str, status: u16) {
    tracing::info!(target: "api", "{method} {path} - {status}");
}

pub fn log_dispatch(request_id: &str, stage: &str, deployment: u64, route_key: &str, target: &str) {
    tracing::debug!(
        request_id,
        stage,
        deployment,
        route = route_key,
        function = target,
        "Route matched"
    );
}

pub fn log_denied(caller: &str, target: &str, source: &str) {
    tracing::warn!(caller, function = target, source, "Invocation denied");
}

pub fn log_fault(request_id: &str, target: &str, reason: FaultReason, detail: &str) {
    tracing::error!(request_id, function = target, %reason, "Invocation failed: {detail}");
}

pub fn log_resource_change(kind: &str, name: &str) {
    tracing::info!("[Config] {kind}: {name}");
}

pub fn log_deployment(id: u64, routes: usize, stages: &[String]) {
    if stages.is_empty() {
        tracing::info!("[Deploy] Deployment {id} recorded ({routes} routes), no stage updated");
    } else {
        tracing::info!(
            "[Deploy] Deployment {id} ({routes} routes) active on: {}",
            stages.join(", ")
        );
    }
}

pub fn log_targets_pruned(count: usize) {
    tracing::info!("[Registry] Pruned {count} unreferenced target version(s)");
}
