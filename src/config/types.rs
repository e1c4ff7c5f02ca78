// Configuration types module
// Defines all configuration-related data structures

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::deploy::StageSpec;
use crate::gateway::{Definitions, GatewaySettings};
use crate::identity::Identity;
use crate::integration::Integration;
use crate::policy::PermissionStatement;
use crate::registry::TargetSpec;
use crate::routing::RouteSpec;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub http: HttpConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub identities: Vec<Identity>,
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub permissions: Vec<PermissionStatement>,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub integrations: Vec<Integration>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

impl Config {
    /// Declarative records to bootstrap the gateway with
    pub fn definitions(&self) -> Definitions {
        Definitions {
            identities: self.identities.clone(),
            targets: self.targets.clone(),
            permissions: self.permissions.clone(),
            stages: self.stages.clone(),
            integrations: self.integrations.clone(),
            routes: self.routes.clone(),
        }
    }
}

/// Server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_host: String,
    pub api_port: u16,
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info" or "lambda_dispatch=debug"
    pub level: String,
    pub access_log: bool,
    pub show_headers: bool,
    /// Access log format (combined, common, json, or custom pattern)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// Performance configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PerformanceConfig {
    pub keep_alive_timeout: u64,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub max_connections: Option<u64>,
}

/// HTTP configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub server_name: String,
    pub max_body_size: u64,
}

/// Gateway identity and invocation defaults
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatewayConfig {
    /// Logical API id used in authorization scopes
    pub api_id: String,
    /// Principal the gateway presents when invoking targets
    pub caller_principal: String,
    /// Principal that assumes target identities
    pub execution_principal: String,
    pub default_timeout_ms: u64,
    /// Save runtime changes to state.toml and prefer it at startup
    #[serde(default)]
    pub persist_state: bool,
}

impl GatewayConfig {
    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            api_id: self.api_id.clone(),
            caller_principal: self.caller_principal.clone(),
            execution_principal: self.execution_principal.clone(),
            default_timeout: Duration::from_millis(self.default_timeout_ms),
        }
    }
}
