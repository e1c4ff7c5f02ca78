//! Deployment and stage management
//!
//! A deployment is an immutable snapshot of a route table. The API's history
//! is the ordered list of deployments. Each stage points at zero or one
//! deployment; pointing it elsewhere is a single `Arc` swap, so a dispatch
//! holding the previous snapshot finishes against it untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::registry::TargetRef;
use crate::routing::{resolve_stage, RouteTable};

/// Immutable route table snapshot
#[derive(Debug)]
pub struct Deployment {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub table: RouteTable,
}

/// Declarative stage record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    #[serde(default)]
    pub auto_deploy: bool,
}

/// A named pointer to the active deployment
#[derive(Debug)]
pub struct Stage {
    pub name: String,
    pub auto_deploy: bool,
    active: RwLock<Option<Arc<Deployment>>>,
}

impl Stage {
    fn new(spec: &StageSpec) -> Self {
        Self {
            name: spec.name.clone(),
            auto_deploy: spec.auto_deploy,
            active: RwLock::new(None),
        }
    }

    /// Active deployment, `None` while the stage is empty
    pub async fn active(&self) -> Option<Arc<Deployment>> {
        self.active.read().await.clone()
    }

    async fn set_active(&self, deployment: Arc<Deployment>) {
        *self.active.write().await = Some(deployment);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("stage '{0}' not found")]
    UnknownStage(String),
    #[error("stage '{0}' already exists")]
    DuplicateStage(String),
    #[error("invalid stage name '{0}'")]
    InvalidName(String),
    #[error("deployment {0} not found")]
    UnknownDeployment(u64),
    #[error("no deployment has been created yet")]
    NoDeployments,
}

pub struct StageManager {
    stages: RwLock<Arc<BTreeMap<String, Arc<Stage>>>>,
    history: RwLock<Vec<Arc<Deployment>>>,
    next_id: AtomicU64,
}

impl StageManager {
    pub fn new() -> Self {
        Self {
            stages: RwLock::new(Arc::new(BTreeMap::new())),
            history: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a stage; an auto-deploy stage starts on the latest deployment
    pub async fn add_stage(&self, spec: &StageSpec) -> Result<Arc<Stage>, StageError> {
        if spec.name.is_empty() || spec.name.contains('/') {
            return Err(StageError::InvalidName(spec.name.clone()));
        }

        // Held until the stage is live so no deployment lands in between
        let history = self.history.read().await;
        let stage = {
            let mut guard = self.stages.write().await;
            if guard.contains_key(&spec.name) {
                return Err(StageError::DuplicateStage(spec.name.clone()));
            }
            let stage = Arc::new(Stage::new(spec));
            let mut next = (**guard).clone();
            next.insert(spec.name.clone(), Arc::clone(&stage));
            *guard = Arc::new(next);
            stage
        };

        if stage.auto_deploy {
            if let Some(latest) = history.last() {
                stage.set_active(Arc::clone(latest)).await;
            }
        }
        Ok(stage)
    }

    /// Record a new deployment and roll it out to auto-deploy stages
    ///
    /// Returns the deployment and the names of the stages now serving it.
    pub async fn create_deployment(
        &self,
        table: RouteTable,
        description: Option<String>,
    ) -> (Arc<Deployment>, Vec<String>) {
        // Lock order is history then stages, same as `add_stage`. The rollout
        // finishes under the history lock so auto-deploy stages never step
        // back to an older deployment.
        let mut history = self.history.write().await;
        let deployment = Arc::new(Deployment {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            created_at: Utc::now(),
            description,
            table,
        });
        history.push(Arc::clone(&deployment));

        let mut deployed = Vec::new();
        for stage in self.stages().await {
            if stage.auto_deploy {
                stage.set_active(Arc::clone(&deployment)).await;
                deployed.push(stage.name.clone());
            }
        }
        (deployment, deployed)
    }

    /// Point `stage` at a deployment (the latest when `id` is `None`)
    pub async fn deploy(&self, stage: &str, id: Option<u64>) -> Result<Arc<Deployment>, StageError> {
        let target = self.stage(stage).await?;
        let deployment = match id {
            Some(id) => self
                .deployment(id)
                .await
                .ok_or(StageError::UnknownDeployment(id))?,
            None => self.latest().await.ok_or(StageError::NoDeployments)?,
        };
        target.set_active(Arc::clone(&deployment)).await;
        Ok(deployment)
    }

    /// Active deployment of a stage
    pub async fn get_active(&self, stage: &str) -> Result<Option<Arc<Deployment>>, StageError> {
        Ok(self.stage(stage).await?.active().await)
    }

    pub async fn stage(&self, name: &str) -> Result<Arc<Stage>, StageError> {
        self.stages
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StageError::UnknownStage(name.to_string()))
    }

    /// Stage serving `path`, with the path as the route table sees it
    pub async fn resolve(&self, path: &str) -> Option<(Arc<Stage>, String)> {
        let stages = Arc::clone(&*self.stages.read().await);
        let (name, stripped) = resolve_stage(path, stages.keys().map(String::as_str))?;
        stages.get(name).map(|stage| (Arc::clone(stage), stripped))
    }

    pub async fn stages(&self) -> Vec<Arc<Stage>> {
        self.stages.read().await.values().cloned().collect()
    }

    pub async fn deployments(&self) -> Vec<Arc<Deployment>> {
        self.history.read().await.clone()
    }

    pub async fn deployment(&self, id: u64) -> Option<Arc<Deployment>> {
        self.history
            .read()
            .await
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub async fn latest(&self) -> Option<Arc<Deployment>> {
        self.history.read().await.last().cloned()
    }

    /// Target references held by any recorded deployment
    ///
    /// Every deployment in the history can be re-deployed, so each one keeps
    /// its pinned versions alive, active or not.
    pub async fn live_target_refs(&self) -> HashSet<TargetRef> {
        self.history
            .read()
            .await
            .iter()
            .flat_map(|deployment| deployment.table.target_refs())
            .collect()
    }
}

impl Default for StageManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::{CallMode, Integration};
    use crate::routing::{RouteSpec, DEFAULT_STAGE};
    use hyper::Method;

    fn table(path: &str, target: &str) -> RouteTable {
        RouteTable::build(
            &[RouteSpec {
                method: "GET".to_string(),
                path: path.to_string(),
                integration: "i".to_string(),
            }],
            &[Integration {
                id: "i".to_string(),
                target: target.parse().unwrap(),
                mode: CallMode::Proxy,
                timeout_ms: None,
                mapping: None,
            }],
        )
        .unwrap()
    }

    fn spec(name: &str, auto_deploy: bool) -> StageSpec {
        StageSpec {
            name: name.to_string(),
            auto_deploy,
        }
    }

    #[tokio::test]
    async fn test_new_stage_is_empty() {
        let manager = StageManager::new();
        manager.add_stage(&spec("prod", false)).await.unwrap();
        assert!(manager.get_active("prod").await.unwrap().is_none());
        assert_eq!(
            manager.get_active("dev").await.unwrap_err(),
            StageError::UnknownStage("dev".to_string())
        );
    }

    #[tokio::test]
    async fn test_stage_validation() {
        let manager = StageManager::new();
        manager.add_stage(&spec("prod", false)).await.unwrap();
        assert_eq!(
            manager.add_stage(&spec("prod", true)).await.unwrap_err(),
            StageError::DuplicateStage("prod".to_string())
        );
        assert!(manager.add_stage(&spec("a/b", false)).await.is_err());
        assert!(manager.add_stage(&spec("", false)).await.is_err());
    }

    #[tokio::test]
    async fn test_auto_deploy_follows_new_deployments() {
        let manager = StageManager::new();
        manager.add_stage(&spec(DEFAULT_STAGE, true)).await.unwrap();
        manager.add_stage(&spec("prod", false)).await.unwrap();

        let (first, deployed) = manager.create_deployment(table("/a", "greet"), None).await;
        assert_eq!(deployed, vec![DEFAULT_STAGE.to_string()]);
        assert_eq!(first.id, 1);

        let active = manager.get_active(DEFAULT_STAGE).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&active, &first));
        // Manual stages wait for an explicit deploy
        assert!(manager.get_active("prod").await.unwrap().is_none());

        let (second, _) = manager
            .create_deployment(table("/b", "greet"), Some("second".to_string()))
            .await;
        let active = manager.get_active(DEFAULT_STAGE).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(manager.deployments().await.len(), 2);
    }

    #[tokio::test]
    async fn test_manual_deploy_and_rollback() {
        let manager = StageManager::new();
        manager.add_stage(&spec("prod", false)).await.unwrap();
        assert_eq!(
            manager.deploy("prod", None).await.unwrap_err(),
            StageError::NoDeployments
        );

        manager.create_deployment(table("/a", "greet"), None).await;
        manager.create_deployment(table("/b", "greet"), None).await;

        assert_eq!(manager.deploy("prod", None).await.unwrap().id, 2);
        assert_eq!(manager.deploy("prod", Some(1)).await.unwrap().id, 1);
        assert_eq!(
            manager.deploy("prod", Some(9)).await.unwrap_err(),
            StageError::UnknownDeployment(9)
        );
        // A failed deploy leaves the active pointer alone
        assert_eq!(manager.get_active("prod").await.unwrap().unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_late_auto_deploy_stage_starts_on_latest() {
        let manager = StageManager::new();
        manager.create_deployment(table("/a", "greet"), None).await;
        let stage = manager.add_stage(&spec("dev", true)).await.unwrap();
        assert_eq!(stage.active().await.unwrap().id, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stage_creation_ends_on_latest() {
        let manager = Arc::new(StageManager::new());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                manager.create_deployment(table("/a", "greet"), None).await;
                manager
                    .add_stage(&spec(&format!("dev{i}"), true))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let latest = manager.latest().await.unwrap();
        assert_eq!(latest.id, 16);
        for stage in manager.stages().await {
            assert_eq!(stage.active().await.unwrap().id, latest.id, "{}", stage.name);
        }
    }

    #[tokio::test]
    async fn test_held_snapshot_survives_deploy() {
        let manager = StageManager::new();
        manager.add_stage(&spec(DEFAULT_STAGE, true)).await.unwrap();
        manager.create_deployment(table("/a", "greet"), None).await;

        let held = manager.get_active(DEFAULT_STAGE).await.unwrap().unwrap();
        manager.create_deployment(table("/b", "greet"), None).await;

        // The held snapshot still resolves against its own table
        assert!(held.table.match_route(&Method::GET, "/a").is_some());
        assert!(held.table.match_route(&Method::GET, "/b").is_none());

        let current = manager.get_active(DEFAULT_STAGE).await.unwrap().unwrap();
        assert!(current.table.match_route(&Method::GET, "/b").is_some());
    }

    #[tokio::test]
    async fn test_resolve_stage() {
        let manager = StageManager::new();
        manager.add_stage(&spec(DEFAULT_STAGE, true)).await.unwrap();
        manager.add_stage(&spec("prod", false)).await.unwrap();

        let (stage, path) = manager.resolve("/prod/users").await.unwrap();
        assert_eq!(stage.name, "prod");
        assert_eq!(path, "/users");

        let (stage, path) = manager.resolve("/users").await.unwrap();
        assert_eq!(stage.name, DEFAULT_STAGE);
        assert_eq!(path, "/users");
    }

    #[tokio::test]
    async fn test_live_target_refs_cover_inactive_deployments() {
        let manager = StageManager::new();
        manager.add_stage(&spec("prod", false)).await.unwrap();
        manager.create_deployment(table("/a", "greet:1"), None).await;
        // Not active anywhere, but still a rollback candidate
        let refs = manager.live_target_refs().await;
        assert!(refs.contains(&TargetRef::pinned("greet", 1)));

        manager.create_deployment(table("/a", "greet"), None).await;
        manager.deploy("prod", None).await.unwrap();
        let refs = manager.live_target_refs().await;
        assert!(refs.contains(&TargetRef::pinned("greet", 1)));
        assert!(refs.contains(&TargetRef::latest("greet")));
    }
}
