// Application state module
// Shared state handed to every connection on both servers

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::persist::SharedStateManager;
use super::types::Config;
use super::version::{ResourceType, XdsVersionManager};
use crate::gateway::Gateway;
use crate::logger;

/// Application state
pub struct AppState {
    pub config: Config,
    /// Config file name the process was started with
    pub config_path: String,
    pub gateway: Arc<Gateway>,

    // Cached config values for fast access without locks
    pub cached_access_log: Arc<AtomicBool>,

    // xDS version management
    pub xds_versions: XdsVersionManager,

    // State persistence manager
    pub state_manager: SharedStateManager,

    /// Responses sent by the application server
    pub requests_served: AtomicU64,
}

impl AppState {
    pub fn new(
        config: &Config,
        config_path: &str,
        gateway: Arc<Gateway>,
        state_manager: SharedStateManager,
    ) -> Self {
        Self {
            cached_access_log: Arc::new(AtomicBool::new(config.logging.access_log)),
            config: config.clone(),
            config_path: config_path.to_string(),
            gateway,
            xds_versions: XdsVersionManager::new(),
            state_manager,
            requests_served: AtomicU64::new(0),
        }
    }

    pub fn access_log_enabled(&self) -> bool {
        self.cached_access_log.load(Ordering::Relaxed)
    }

    /// Save the gateway's current definitions if persistence is enabled
    pub async fn persist(&self) {
        if !self.state_manager.is_enabled() {
            return;
        }
        let definitions = self.gateway.export().await;
        if let Err(e) = self.state_manager.save(&definitions).await {
            logger::log_error(&e);
        }
    }

    /// Bump versions affected by a change to `resource_type` and persist
    ///
    /// Returns the new version and nonce of `resource_type` itself.
    pub async fn record_change(&self, resource_type: ResourceType) -> (u64, u64) {
        let bumped = self.xds_versions.increment(resource_type);
        match resource_type {
            // New deployments move auto-deploy stages and may prune target versions
            ResourceType::Route => {
                self.xds_versions.increment(ResourceType::Stage);
                self.xds_versions.increment(ResourceType::Target);
            }
            ResourceType::Stage => {
                self.xds_versions.increment(ResourceType::Target);
            }
            ResourceType::Identity | ResourceType::Target | ResourceType::Permission => {}
        }
        self.persist().await;
        bumped
    }
}
