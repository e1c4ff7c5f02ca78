// Signal handling module
//
// Supported signals:
// - SIGHUP:  Re-read routes and integrations from the config file and deploy them
// - SIGTERM: Graceful shutdown
// - SIGINT:  Graceful shutdown (Ctrl+C)

use std::sync::Arc;
use tokio::sync::watch;

use crate::config::{AppState, Config, ResourceType};
use crate::logger;

/// Deploy the routes and integrations currently in the config file
///
/// Identities, targets and permissions are left alone; they are managed
/// through the API once the gateway is running. Does nothing when the file's
/// routes match what is deployed.
pub async fn reload_routes(state: &AppState) -> Result<String, String> {
    logger::log_reload(&state.config_path);

    let config = Config::load_from(&state.config_path)
        .map_err(|e| format!("Failed to load {}: {e}", state.config_path))?;
    let definitions = config.definitions();

    let current = state.gateway.export().await;
    if current.routes == definitions.routes && current.integrations == definitions.integrations {
        return Ok("Routes unchanged".to_string());
    }

    let (deployment, deployed) = state
        .gateway
        .apply_routes(
            &definitions.routes,
            &definitions.integrations,
            Some(format!("reload of {}", state.config_path)),
        )
        .await
        .map_err(|e| format!("Reload rejected: {e}"))?;
    state.record_change(ResourceType::Route).await;

    Ok(format!(
        "Deployment {} recorded, active on {} stage(s)",
        deployment.id,
        deployed.len()
    ))
}

async fn reload(state: &AppState) {
    match reload_routes(state).await {
        Ok(message) => tracing::info!("{message}"),
        Err(e) => logger::log_error(&e),
    }
}

/// Start signal handlers (Unix only)
///
/// Sends `true` on `shutdown` when SIGTERM or SIGINT arrives.
#[cfg(unix)]
pub fn start_signal_handler(state: Arc<AppState>, shutdown: watch::Sender<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let registered = signal(SignalKind::hangup()).and_then(|hup| {
            Ok((
                hup,
                signal(SignalKind::terminate())?,
                signal(SignalKind::interrupt())?,
            ))
        });
        let (mut sighup, mut sigterm, mut sigint) = match registered {
            Ok(signals) => signals,
            Err(e) => {
                logger::log_error(&format!("Failed to register signal handlers: {e}"));
                return;
            }
        };

        tracing::info!(pid = std::process::id(), "Signal handlers registered (HUP reloads routes)");

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("SIGHUP received");
                    reload(&state).await;
                }
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received");
                    break;
                }
                _ = sigint.recv() => {
                    tracing::info!("SIGINT received");
                    break;
                }
            }
        }

        logger::log_shutdown();
        let _ = shutdown.send(true);
    });
}

/// Windows fallback - only handles Ctrl+C
#[cfg(not(unix))]
pub fn start_signal_handler(_state: Arc<AppState>, shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            logger::log_shutdown();
            let _ = shutdown.send(true);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::create_state_manager;
    use crate::function::HandlerCatalog;
    use crate::gateway::tests::{gateway_with, greet_definitions};

    fn write_config(dir: &std::path::Path, routes: &str) -> String {
        let path = dir.join("gateway.toml");
        std::fs::write(
            &path,
            format!(
                r#"
[[integrations]]
id = "greet"
target = "greet"

{routes}
"#
            ),
        )
        .unwrap();
        dir.join("gateway").display().to_string()
    }

    async fn state_for(config_path: &str) -> AppState {
        let gateway = gateway_with(&greet_definitions(true), HandlerCatalog::with_builtins()).await;
        let config = Config::load_from(config_path).unwrap();
        AppState::new(
            &config,
            config_path,
            Arc::new(gateway),
            create_state_manager(config_path, false),
        )
    }

    #[tokio::test]
    async fn test_reload_deploys_new_routes() {
        let dir = std::env::temp_dir().join(format!("reload-new-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = write_config(
            &dir,
            "[[routes]]\nmethod = \"GET\"\npath = \"/\"\nintegration = \"greet\"\n\n[[routes]]\nmethod = \"POST\"\npath = \"/greet\"\nintegration = \"greet\"\n",
        );
        let state = state_for(&config_path).await;
        let (before, _) = state.xds_versions.get_version(ResourceType::Route);

        let message = reload_routes(&state).await.unwrap();
        assert!(message.starts_with("Deployment 2"), "{message}");
        assert_eq!(state.gateway.stages.deployments().await.len(), 2);
        assert!(state.xds_versions.get_version(ResourceType::Route).0 > before);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_reload_skips_unchanged_routes() {
        let dir = std::env::temp_dir().join(format!("reload-same-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = write_config(
            &dir,
            "[[routes]]\nmethod = \"GET\"\npath = \"/\"\nintegration = \"greet\"\n",
        );
        let state = state_for(&config_path).await;

        assert_eq!(reload_routes(&state).await.unwrap(), "Routes unchanged");
        assert_eq!(state.gateway.stages.deployments().await.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
