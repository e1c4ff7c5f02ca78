//! Gateway composition
//!
//! Owns the identity, target, policy and stage stores plus the function
//! catalog, and applies declarative definitions to them. Bootstrap from the
//! config file and the management API both go through these methods.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::deploy::{Deployment, StageError, StageManager, StageSpec};
use crate::dispatch::{self, DispatchError, Dispatched};
use crate::function::HandlerCatalog;
use crate::identity::{Identity, IdentityError, IdentityStore};
use crate::integration::{Bindings, Integration, RequestEnvelope};
use crate::logger;
use crate::policy::{PermissionStatement, PolicyError, PolicyStore};
use crate::registry::{InvocationTarget, RegistryError, TargetRegistry, TargetSpec};
use crate::routing::{RouteSpec, RouteTable, RouteTableError, DEFAULT_STAGE};

/// Gateway-wide settings
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Logical API id, first component of every authorization scope
    pub api_id: String,
    /// Principal the gateway presents when invoking targets
    pub caller_principal: String,
    /// Principal that assumes target identities when running them
    pub execution_principal: String,
    pub default_timeout: Duration,
}

/// Declarative gateway records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definitions {
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

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Routes(#[from] RouteTableError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("identity '{0}' not found")]
    IdentityNotFound(String),
    #[error("no handler is available for endpoint '{0}'")]
    UnknownEndpoint(String),
}

impl GatewayError {
    /// Whether the error reports a clash with existing state
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Identity(IdentityError::Conflict(_))
                | Self::Registry(RegistryError::IdentityMismatch { .. })
                | Self::Policy(PolicyError::DuplicateSid(_))
                | Self::Routes(RouteTableError::Conflict(_, _))
                | Self::Stage(StageError::DuplicateStage(_))
        )
    }
}

/// Routes and integrations of the most recent successful build
#[derive(Debug, Clone, Default)]
struct RouteDefinitions {
    routes: Vec<RouteSpec>,
    integrations: Vec<Integration>,
}

pub struct Gateway {
    pub settings: GatewaySettings,
    pub identities: IdentityStore,
    pub targets: TargetRegistry,
    pub policy: PolicyStore,
    pub stages: StageManager,
    catalog: HandlerCatalog,
    route_definitions: RwLock<RouteDefinitions>,
    /// Held from target validation through pruning in `apply_routes`
    lifecycle: Mutex<()>,
}

impl Gateway {
    pub fn new(settings: GatewaySettings, catalog: HandlerCatalog) -> Self {
        Self {
            targets: TargetRegistry::new(&settings.execution_principal),
            settings,
            identities: IdentityStore::new(),
            policy: PolicyStore::new(),
            stages: StageManager::new(),
            catalog,
            route_definitions: RwLock::new(RouteDefinitions::default()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Apply a full set of definitions to an empty gateway
    ///
    /// Without explicit stages, a `$default` auto-deploy stage is created.
    pub async fn bootstrap(&self, definitions: &Definitions) -> Result<(), GatewayError> {
        for identity in &definitions.identities {
            self.register_identity(identity.clone()).await?;
        }
        for target in &definitions.targets {
            self.register_target(target).await?;
        }
        for statement in &definitions.permissions {
            self.add_permission(statement.clone()).await?;
        }

        if definitions.stages.is_empty() {
            self.add_stage(&StageSpec {
                name: DEFAULT_STAGE.to_string(),
                auto_deploy: true,
            })
            .await?;
        } else {
            for stage in &definitions.stages {
                self.add_stage(stage).await?;
            }
        }

        if !definitions.routes.is_empty() || !definitions.integrations.is_empty() {
            self.apply_routes(
                &definitions.routes,
                &definitions.integrations,
                Some("initial deployment".to_string()),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn register_identity(&self, identity: Identity) -> Result<Arc<Identity>, GatewayError> {
        let identity = self.identities.register_identity(identity).await?;
        logger::log_resource_change("identity", &identity.name);
        Ok(identity)
    }

    /// Register a new version of a target
    pub async fn register_target(
        &self,
        spec: &TargetSpec,
    ) -> Result<Arc<InvocationTarget>, GatewayError> {
        let identity = self
            .identities
            .get(&spec.identity)
            .await
            .ok_or_else(|| GatewayError::IdentityNotFound(spec.identity.clone()))?;
        if !self.catalog.contains(&spec.endpoint) {
            return Err(GatewayError::UnknownEndpoint(spec.endpoint.clone()));
        }
        let target = self
            .targets
            .register(&spec.name, &spec.endpoint, identity)
            .await?;
        logger::log_resource_change("target", &target.qualified_name());
        Ok(target)
    }

    pub async fn add_permission(&self, statement: PermissionStatement) -> Result<(), GatewayError> {
        let sid = statement.sid.clone();
        self.policy.add_statement(statement).await?;
        logger::log_resource_change("permission", &sid);
        Ok(())
    }

    pub async fn remove_permission(&self, sid: &str) -> Result<PermissionStatement, GatewayError> {
        let removed = self.policy.remove_statement(sid).await?;
        logger::log_resource_change("permission removed", sid);
        Ok(removed)
    }

    pub async fn add_stage(&self, spec: &StageSpec) -> Result<(), GatewayError> {
        self.stages.add_stage(spec).await?;
        logger::log_resource_change("stage", &spec.name);
        Ok(())
    }

    /// Rebuild the route table and record a new deployment
    ///
    /// Nothing is recorded or activated unless the whole table is valid and
    /// every integration's target resolves. Auto-deploy stages switch to the
    /// new deployment.
    pub async fn apply_routes(
        &self,
        routes: &[RouteSpec],
        integrations: &[Integration],
        description: Option<String>,
    ) -> Result<(Arc<Deployment>, Vec<String>), GatewayError> {
        let table = RouteTable::build(routes, integrations)?;
        let _lifecycle = self.lifecycle.lock().await;
        for integration in table.integrations() {
            self.targets.resolve_ref(&integration.target).await?;
        }

        let mut definitions = self.route_definitions.write().await;
        let (deployment, deployed) = self.stages.create_deployment(table, description).await;
        *definitions = RouteDefinitions {
            routes: routes.to_vec(),
            integrations: integrations.to_vec(),
        };
        drop(definitions);

        logger::log_deployment(deployment.id, deployment.table.route_count(), &deployed);
        self.prune_targets().await;
        Ok((deployment, deployed))
    }

    /// Point a stage at a deployment (latest when `id` is `None`)
    pub async fn deploy(&self, stage: &str, id: Option<u64>) -> Result<Arc<Deployment>, GatewayError> {
        // Re-pointing a stage leaves the live set unchanged
        let deployment = self.stages.deploy(stage, id).await?;
        logger::log_deployment(deployment.id, deployment.table.route_count(), &[stage.to_string()]);
        Ok(deployment)
    }

    /// Drop target versions no recorded deployment references
    ///
    /// Callers hold `lifecycle`.
    async fn prune_targets(&self) {
        let live = self.stages.live_target_refs().await;
        let removed = self.targets.prune(&live).await;
        if removed > 0 {
            logger::log_targets_pruned(removed);
        }
    }

    /// Resolve and invoke a request
    pub async fn dispatch(&self, request: &RequestEnvelope) -> Result<Dispatched, DispatchError> {
        dispatch::dispatch(self, request).await
    }

    pub fn bindings(&self) -> Bindings<'_> {
        Bindings {
            policy: &self.policy,
            targets: &self.targets,
            catalog: &self.catalog,
            caller_principal: &self.settings.caller_principal,
            default_timeout: self.settings.default_timeout,
        }
    }

    /// Current state as declarative records
    ///
    /// Targets are exported at their latest version.
    pub async fn export(&self) -> Definitions {
        let identities = self
            .identities
            .list()
            .await
            .iter()
            .map(|identity| (**identity).clone())
            .collect();

        let mut targets: Vec<TargetSpec> = Vec::new();
        for target in self.targets.list().await {
            // `list` is sorted by version, so later entries supersede earlier ones
            targets.retain(|spec| spec.name != target.name);
            targets.push(TargetSpec {
                name: target.name.clone(),
                endpoint: target.endpoint.clone(),
                identity: target.identity.name.clone(),
            });
        }

        let stages = self
            .stages
            .stages()
            .await
            .iter()
            .map(|stage| StageSpec {
                name: stage.name.clone(),
                auto_deploy: stage.auto_deploy,
            })
            .collect();

        let route_definitions = self.route_definitions.read().await.clone();

        Definitions {
            identities,
            targets,
            permissions: (*self.policy.statements().await).clone(),
            stages,
            integrations: route_definitions.integrations,
            routes: route_definitions.routes,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identity::{TrustEntry, ASSUME_ROLE_ACTION};
    use crate::integration::CallMode;
    use crate::policy::{Effect, INVOKE_ACTION};
    use crate::registry::TargetRef;

    pub const API_ID: &str = "api123";
    pub const GATEWAY: &str = "apigateway.amazonaws.com";
    pub const LAMBDA: &str = "lambda.amazonaws.com";

    pub fn settings() -> GatewaySettings {
        GatewaySettings {
            api_id: API_ID.to_string(),
            caller_principal: GATEWAY.to_string(),
            execution_principal: LAMBDA.to_string(),
            default_timeout: Duration::from_secs(5),
        }
    }

    /// Greeting setup: `GET /` proxied to `greet`
    pub fn greet_definitions(allow: bool) -> Definitions {
        let mut permissions = Vec::new();
        if allow {
            permissions.push(PermissionStatement {
                sid: "AllowExecutionFromAPIGateway".to_string(),
                action: INVOKE_ACTION.to_string(),
                principal: GATEWAY.to_string(),
                target: "greet".to_string(),
                source: Some(format!("{API_ID}/*/*")),
                effect: Effect::Allow,
            });
        }

        Definitions {
            identities: vec![Identity {
                name: "greet-exec".to_string(),
                trust: vec![TrustEntry {
                    principal: LAMBDA.to_string(),
                    action: ASSUME_ROLE_ACTION.to_string(),
                    effect: Effect::Allow,
                }],
            }],
            targets: vec![TargetSpec {
                name: "greet".to_string(),
                endpoint: "builtin:greet".to_string(),
                identity: "greet-exec".to_string(),
            }],
            permissions,
            stages: Vec::new(),
            integrations: vec![Integration {
                id: "greet".to_string(),
                target: TargetRef::latest("greet"),
                mode: CallMode::Proxy,
                timeout_ms: None,
                mapping: None,
            }],
            routes: vec![RouteSpec {
                method: "GET".to_string(),
                path: "/".to_string(),
                integration: "greet".to_string(),
            }],
        }
    }

    pub async fn gateway_with(definitions: &Definitions, catalog: HandlerCatalog) -> Gateway {
        let gateway = Gateway::new(settings(), catalog);
        gateway.bootstrap(definitions).await.unwrap();
        gateway
    }

    #[tokio::test]
    async fn test_bootstrap_creates_default_stage() {
        let gateway = gateway_with(&greet_definitions(true), HandlerCatalog::with_builtins()).await;
        let active = gateway.stages.get_active(DEFAULT_STAGE).await.unwrap();
        assert_eq!(active.unwrap().description.as_deref(), Some("initial deployment"));
    }

    #[tokio::test]
    async fn test_register_target_errors() {
        let gateway = gateway_with(&greet_definitions(true), HandlerCatalog::with_builtins()).await;

        let missing_identity = TargetSpec {
            name: "x".to_string(),
            endpoint: "builtin:echo".to_string(),
            identity: "nobody".to_string(),
        };
        assert!(matches!(
            gateway.register_target(&missing_identity).await.unwrap_err(),
            GatewayError::IdentityNotFound(_)
        ));

        let missing_endpoint = TargetSpec {
            name: "x".to_string(),
            endpoint: "builtin:nope".to_string(),
            identity: "greet-exec".to_string(),
        };
        assert!(matches!(
            gateway.register_target(&missing_endpoint).await.unwrap_err(),
            GatewayError::UnknownEndpoint(_)
        ));
    }

    #[tokio::test]
    async fn test_conflicting_routes_block_deployment() {
        let gateway = gateway_with(&greet_definitions(true), HandlerCatalog::with_builtins()).await;
        let defs = greet_definitions(true);
        let mut routes = defs.routes.clone();
        routes.push(defs.routes[0].clone());

        let err = gateway
            .apply_routes(&routes, &defs.integrations, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(gateway.stages.deployments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_target_blocks_deployment() {
        let gateway = gateway_with(&greet_definitions(true), HandlerCatalog::with_builtins()).await;
        let mut defs = greet_definitions(true);
        defs.integrations[0].target = TargetRef::latest("farewell");

        let err = gateway
            .apply_routes(&defs.routes, &defs.integrations, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Registry(RegistryError::NotFound(_))));
        assert_eq!(gateway.stages.deployments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_versions_pruned_when_unreferenced() {
        let defs = greet_definitions(true);
        let gateway = gateway_with(&defs, HandlerCatalog::with_builtins()).await;
        gateway.register_target(&defs.targets[0]).await.unwrap();
        gateway.register_target(&defs.targets[0]).await.unwrap();
        assert_eq!(gateway.targets.list().await.len(), 3);

        // Every deployment so far follows the latest version
        gateway
            .apply_routes(&defs.routes, &defs.integrations, None)
            .await
            .unwrap();
        let versions: Vec<_> = gateway.targets.list().await.iter().map(|t| t.version).collect();
        assert_eq!(versions, vec![3]);
    }

    #[tokio::test]
    async fn test_pinned_versions_outlive_their_deployment() {
        let defs = greet_definitions(true);
        let gateway = gateway_with(&defs, HandlerCatalog::with_builtins()).await;
        gateway.register_target(&defs.targets[0]).await.unwrap();

        let mut pinned = defs.integrations.clone();
        pinned[0].target = TargetRef::pinned("greet", 1);
        gateway.apply_routes(&defs.routes, &pinned, None).await.unwrap();
        gateway
            .apply_routes(&defs.routes, &defs.integrations, None)
            .await
            .unwrap();

        // Deployment 2 is inactive but can still be rolled back to
        let versions: Vec<_> = gateway.targets.list().await.iter().map(|t| t.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deployments_keep_pinned_targets() {
        let defs = greet_definitions(true);
        let gateway = Arc::new(gateway_with(&defs, HandlerCatalog::with_builtins()).await);
        gateway.register_target(&defs.targets[0]).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let gateway = Arc::clone(&gateway);
            let defs = defs.clone();
            tasks.push(tokio::spawn(async move {
                let mut integrations = defs.integrations.clone();
                if i % 2 == 0 {
                    integrations[0].target = TargetRef::pinned("greet", 1);
                }
                gateway
                    .apply_routes(&defs.routes, &integrations, None)
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for deployment in gateway.stages.deployments().await {
            for target in deployment.table.target_refs() {
                assert!(gateway.targets.resolve_ref(&target).await.is_ok(), "{target}");
            }
        }
    }

    #[tokio::test]
    async fn test_export_round_trip() {
        let defs = greet_definitions(true);
        let gateway = gateway_with(&defs, HandlerCatalog::with_builtins()).await;
        let exported = gateway.export().await;

        assert_eq!(exported.identities, defs.identities);
        assert_eq!(exported.targets, defs.targets);
        assert_eq!(exported.permissions, defs.permissions);
        assert_eq!(exported.routes, defs.routes);
        assert_eq!(exported.stages.len(), 1);
        assert_eq!(exported.stages[0].name, DEFAULT_STAGE);

        let rebuilt = gateway_with(&exported, HandlerCatalog::with_builtins()).await;
        assert_eq!(rebuilt.export().await, exported);
    }
}
