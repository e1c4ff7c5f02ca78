// Resource update functions module
//
// Batches are applied in order and stop at the first failure; records
// applied before the failure stay applied.

use serde::de::DeserializeOwned;

use super::types::{RouteUpdateRequest, UpdateRequest};
use crate::config::AppState;
use crate::deploy::StageSpec;
use crate::gateway::GatewayError;
use crate::identity::Identity;
use crate::policy::PermissionStatement;
use crate::registry::TargetSpec;

/// A failed update
#[derive(Debug)]
pub enum UpdateError {
    /// Request body did not describe valid resources
    Invalid(String),
    /// A store rejected a record after `applied` earlier ones succeeded
    Rejected { applied: usize, error: GatewayError },
}

impl UpdateError {
    fn rejected(applied: usize, error: GatewayError) -> Self {
        Self::Rejected { applied, error }
    }
}

fn parse_all<T: DeserializeOwned>(resources: &[serde_json::Value], kind: &str) -> Result<Vec<T>, UpdateError> {
    resources
        .iter()
        .map(|r| {
            serde_json::from_value(r.clone())
                .map_err(|e| UpdateError::Invalid(format!("Invalid {kind} resource: {e}")))
        })
        .collect()
}

fn require_resources(update: &UpdateRequest) -> Result<(), UpdateError> {
    if update.resources.is_empty() {
        return Err(UpdateError::Invalid("No resources provided".to_string()));
    }
    Ok(())
}

/// Register identities
pub async fn update_identities(state: &AppState, update: &UpdateRequest) -> Result<String, UpdateError> {
    require_resources(update)?;
    let identities: Vec<Identity> = parse_all(&update.resources, "identity")?;

    for (applied, identity) in identities.iter().enumerate() {
        state
            .gateway
            .register_identity(identity.clone())
            .await
            .map_err(|e| UpdateError::rejected(applied, e))?;
    }
    Ok(format!("Registered {} identities", identities.len()))
}

/// Register a new version of each target
pub async fn update_targets(state: &AppState, update: &UpdateRequest) -> Result<String, UpdateError> {
    require_resources(update)?;
    let specs: Vec<TargetSpec> = parse_all(&update.resources, "target")?;

    let mut registered = Vec::with_capacity(specs.len());
    for (applied, spec) in specs.iter().enumerate() {
        let target = state
            .gateway
            .register_target(spec)
            .await
            .map_err(|e| UpdateError::rejected(applied, e))?;
        registered.push(target.qualified_name());
    }
    Ok(format!("Registered {}", registered.join(", ")))
}

/// Add and remove permission statements
///
/// Removals are applied before additions, so a statement can be replaced by
/// removing and re-adding its sid in one request.
pub async fn update_permissions(state: &AppState, update: &UpdateRequest) -> Result<String, UpdateError> {
    if update.resources.is_empty() && update.remove.is_empty() {
        return Err(UpdateError::Invalid("No resources provided".to_string()));
    }
    let statements: Vec<PermissionStatement> = parse_all(&update.resources, "permission")?;

    let mut applied = 0;
    for sid in &update.remove {
        state
            .gateway
            .remove_permission(sid)
            .await
            .map_err(|e| UpdateError::rejected(applied, e))?;
        applied += 1;
    }
    for statement in statements {
        state
            .gateway
            .add_permission(statement)
            .await
            .map_err(|e| UpdateError::rejected(applied, e))?;
        applied += 1;
    }
    Ok(format!(
        "Permissions updated: {} removed, {} added",
        update.remove.len(),
        update.resources.len()
    ))
}

/// Create stages
pub async fn update_stages(state: &AppState, update: &UpdateRequest) -> Result<String, UpdateError> {
    require_resources(update)?;
    let specs: Vec<StageSpec> = parse_all(&update.resources, "stage")?;

    for (applied, spec) in specs.iter().enumerate() {
        state
            .gateway
            .add_stage(spec)
            .await
            .map_err(|e| UpdateError::rejected(applied, e))?;
    }
    Ok(format!("Created {} stage(s)", specs.len()))
}

/// Rebuild the route table and record a deployment
pub async fn update_routes(state: &AppState, update: RouteUpdateRequest) -> Result<String, UpdateError> {
    let (deployment, deployed) = state
        .gateway
        .apply_routes(&update.routes, &update.integrations, update.description)
        .await
        .map_err(|e| UpdateError::rejected(0, e))?;

    if deployed.is_empty() {
        Ok(format!("Deployment {} recorded", deployment.id))
    } else {
        Ok(format!(
            "Deployment {} recorded and active on: {}",
            deployment.id,
            deployed.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{create_state_manager, Config};
    use crate::function::HandlerCatalog;
    use crate::gateway::tests::{gateway_with, greet_definitions};
    use serde_json::json;
    use std::sync::Arc;

    const CONFIG_PATH: &str = "does-not-exist/gateway";

    async fn state() -> AppState {
        let gateway = gateway_with(&greet_definitions(true), HandlerCatalog::with_builtins()).await;
        AppState::new(
            &Config::load_from(CONFIG_PATH).unwrap(),
            CONFIG_PATH,
            Arc::new(gateway),
            create_state_manager(CONFIG_PATH, false),
        )
    }

    fn update(resources: Vec<serde_json::Value>) -> UpdateRequest {
        UpdateRequest {
            version_info: String::new(),
            resources,
            remove: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_target_batch_stops_at_first_failure() {
        let state = state().await;
        let request = update(vec![
            json!({"name": "echo", "endpoint": "builtin:echo", "identity": "greet-exec"}),
            json!({"name": "ghost", "endpoint": "builtin:missing", "identity": "greet-exec"}),
            json!({"name": "late", "endpoint": "builtin:echo", "identity": "greet-exec"}),
        ]);

        let err = update_targets(&state, &request).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Rejected { applied: 1, error: GatewayError::UnknownEndpoint(_) }
        ));
        assert!(state.gateway.targets.resolve("echo").await.is_ok());
        assert!(state.gateway.targets.resolve("late").await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_resource_is_invalid() {
        let state = state().await;
        let request = update(vec![json!({"name": "no-endpoint"})]);
        assert!(matches!(
            update_targets(&state, &request).await.unwrap_err(),
            UpdateError::Invalid(_)
        ));
        assert!(matches!(
            update_identities(&state, &update(Vec::new())).await.unwrap_err(),
            UpdateError::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn test_permission_replace_in_one_request() {
        let state = state().await;
        let request = UpdateRequest {
            version_info: String::new(),
            resources: vec![json!({
                "sid": "AllowExecutionFromAPIGateway",
                "principal": "apigateway.amazonaws.com",
                "target": "greet",
                "source": "api123/prod/*",
            })],
            remove: vec!["AllowExecutionFromAPIGateway".to_string()],
        };

        update_permissions(&state, &request).await.unwrap();
        let statements = state.gateway.policy.statements().await;
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].source.as_deref(), Some("api123/prod/*"));
    }

    #[tokio::test]
    async fn test_duplicate_sid_is_conflict() {
        let state = state().await;
        let request = update(vec![json!({
            "sid": "AllowExecutionFromAPIGateway",
            "principal": "*",
            "target": "greet",
        })]);

        match update_permissions(&state, &request).await.unwrap_err() {
            UpdateError::Rejected { applied, error } => {
                assert_eq!(applied, 0);
                assert!(error.is_conflict());
            }
            UpdateError::Invalid(message) => panic!("unexpected invalid: {message}"),
        }
    }

    #[tokio::test]
    async fn test_route_update_records_deployment() {
        let state = state().await;
        let defs = greet_definitions(true);
        let request = RouteUpdateRequest {
            version_info: String::new(),
            routes: defs.routes.clone(),
            integrations: defs.integrations.clone(),
            description: Some("same routes again".to_string()),
        };

        let message = update_routes(&state, request).await.unwrap();
        assert_eq!(message, "Deployment 2 recorded and active on: $default");
    }
}
