// API types module
// Request/response types of the xDS-style discovery API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::integration::Integration;
use crate::routing::RouteSpec;

/// xDS Discovery Response
#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub version_info: String,
    pub resources: Vec<Resource>,
    /// Client echoes the nonce back with its next update
    pub nonce: String,
    pub type_url: String,
}

/// Generic resource wrapper
#[derive(Debug, Serialize)]
pub struct Resource {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub name: String,
    #[serde(flatten)]
    pub value: serde_json::Value,
}

/// Snapshot of every resource type
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub version_info: String,
    pub requests_served: u64,
    pub resources: Vec<DiscoveryResponse>,
}

/// Update for identities, targets, permissions and stages
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    /// Version returned by client (for optimistic locking)
    #[serde(default)]
    pub version_info: String,
    #[serde(default)]
    pub resources: Vec<serde_json::Value>,
    /// Permission sids to remove
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Route table replacement
#[derive(Debug, Deserialize)]
pub struct RouteUpdateRequest {
    #[serde(default)]
    pub version_info: String,
    pub routes: Vec<RouteSpec>,
    pub integrations: Vec<Integration>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub stage: String,
    /// Latest deployment when absent
    #[serde(default)]
    pub deployment_id: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StageView {
    pub name: String,
    pub auto_deploy: bool,
    pub active_deployment: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DeploymentView {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub routes: Vec<String>,
    /// Stages currently serving this deployment
    pub stages: Vec<String>,
}
