// Definition persistence module
// Saves gateway definitions changed at runtime to state.toml

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::gateway::Definitions;
use crate::logger;

/// State file manager
pub struct StateManager {
    /// Path to state file
    state_path: PathBuf,
    /// Whether persistence is enabled
    enabled: bool,
}

impl StateManager {
    /// Create a new state manager
    ///
    /// `config_path` is the config file name as passed on the command line;
    /// state.toml is placed in the same directory.
    pub fn new(config_path: &str, enabled: bool) -> Self {
        let config_dir = Path::new(config_path)
            .parent()
            .unwrap_or_else(|| Path::new("."));

        Self {
            state_path: config_dir.join("state.toml"),
            enabled,
        }
    }

    /// Load persisted definitions, if enabled and present
    pub fn load(&self) -> Option<Definitions> {
        if !self.enabled || !self.state_path.exists() {
            return None;
        }

        let content = match std::fs::read_to_string(&self.state_path) {
            Ok(content) => content,
            Err(e) => {
                logger::log_error(&format!(
                    "Failed to read state file {}: {e}",
                    self.state_path.display()
                ));
                return None;
            }
        };

        match from_toml(&content) {
            Ok(definitions) => {
                tracing::info!("Loaded persistent state from {}", self.state_path.display());
                Some(definitions)
            }
            Err(e) => {
                logger::log_error(&format!(
                    "Failed to parse state file {}: {e}",
                    self.state_path.display()
                ));
                None
            }
        }
    }

    /// Write the current definitions
    pub async fn save(&self, definitions: &Definitions) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }

        let content = to_toml(definitions)?;
        // Write then rename so a crash never leaves a truncated file
        let tmp = self.state_path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| format!("Failed to write state file: {e}"))?;
        tokio::fs::rename(&tmp, &self.state_path)
            .await
            .map_err(|e| format!("Failed to replace state file: {e}"))
    }

    /// Remove the state file; the next start uses the config file again
    pub async fn clear(&self) -> Result<(), String> {
        if self.enabled && self.state_path.exists() {
            tokio::fs::remove_file(&self.state_path)
                .await
                .map_err(|e| format!("Failed to remove state file: {e}"))?;
        }
        Ok(())
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Wrapper for Arc<StateManager>
pub type SharedStateManager = Arc<StateManager>;

pub fn create_state_manager(config_path: &str, enabled: bool) -> SharedStateManager {
    Arc::new(StateManager::new(config_path, enabled))
}

/// Render definitions in config file syntax
pub fn to_toml(definitions: &Definitions) -> Result<String, String> {
    toml::to_string_pretty(definitions).map_err(|e| format!("Failed to serialize state: {e}"))
}

pub fn from_toml(content: &str) -> Result<Definitions, String> {
    toml::from_str(content).map_err(|e| e.to_string())
}
