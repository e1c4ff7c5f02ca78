//! Invocation target registry
//!
//! Maps a logical function name to its versioned, invocable endpoint.
//! Registering a name again publishes a new version; older versions stay
//! resolvable while a live route pins them and are pruned afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::identity::Identity;

/// Declarative target registration record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    /// Endpoint reference resolved by the handler catalog (e.g. "builtin:greet")
    pub endpoint: String,
    /// Name of the identity the target runs under
    pub identity: String,
}

/// A concrete version of an invocation target
#[derive(Debug, Clone)]
pub struct InvocationTarget {
    pub name: String,
    pub version: u64,
    pub endpoint: String,
    pub identity: Arc<Identity>,
}

impl InvocationTarget {
    /// "name:version"
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// Reference to a target: `name` follows the latest version, `name:N` pins one
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetRef {
    pub name: String,
    pub version: Option<u64>,
}

impl TargetRef {
    pub fn latest(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
        }
    }

    pub fn pinned(name: &str, version: u64) -> Self {
        Self {
            name: name.to_string(),
            version: Some(version),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{}:{version}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for TargetRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = match s.split_once(':') {
            Some((name, version)) => {
                let version = version
                    .parse::<u64>()
                    .map_err(|e| format!("Invalid target version in '{s}': {e}"))?;
                if version == 0 {
                    return Err(format!("Target versions start at 1: '{s}'"));
                }
                (name, Some(version))
            }
            None => (s, None),
        };
        if name.is_empty() {
            return Err(format!("Empty target name in '{s}'"));
        }
        Ok(version.map_or_else(|| Self::latest(name), |version| Self::pinned(name, version)))
    }
}

impl TryFrom<String> for TargetRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetRef> for String {
    fn from(value: TargetRef) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invocation target '{0}' not found")]
    NotFound(String),
    #[error("identity '{identity}' cannot be assumed by '{principal}'")]
    Untrusted { identity: String, principal: String },
    #[error("target '{name}' is bound to identity '{bound}', not '{requested}'")]
    IdentityMismatch {
        name: String,
        bound: String,
        requested: String,
    },
}

#[derive(Debug, Clone, Default)]
struct TargetVersions {
    latest: u64,
    versions: BTreeMap<u64, Arc<InvocationTarget>>,
}

/// Copy-on-write registry of invocation targets
pub struct TargetRegistry {
    targets: RwLock<Arc<HashMap<String, TargetVersions>>>,
    /// Principal that must be able to assume a target's identity
    execution_principal: String,
}

impl TargetRegistry {
    pub fn new(execution_principal: &str) -> Self {
        Self {
            targets: RwLock::new(Arc::new(HashMap::new())),
            execution_principal: execution_principal.to_string(),
        }
    }

    pub fn execution_principal(&self) -> &str {
        &self.execution_principal
    }

    /// Register a new version of `name`
    ///
    /// The new version becomes the latest. The swap is atomic: resolvers see
    /// either the previous map or the complete new one.
    pub async fn register(
        &self,
        name: &str,
        endpoint: &str,
        identity: Arc<Identity>,
    ) -> Result<Arc<InvocationTarget>, RegistryError> {
        if !identity.may_assume(&self.execution_principal) {
            return Err(RegistryError::Untrusted {
                identity: identity.name.clone(),
                principal: self.execution_principal.clone(),
            });
        }

        let mut guard = self.targets.write().await;
        let mut entry = guard.get(name).cloned().unwrap_or_default();

        if let Some(current) = entry.versions.get(&entry.latest) {
            if current.identity.name != identity.name {
                return Err(RegistryError::IdentityMismatch {
                    name: name.to_string(),
                    bound: current.identity.name.clone(),
                    requested: identity.name.clone(),
                });
            }
        }

        let version = entry.latest + 1;
        let target = Arc::new(InvocationTarget {
            name: name.to_string(),
            version,
            endpoint: endpoint.to_string(),
            identity,
        });
        entry.latest = version;
        entry.versions.insert(version, Arc::clone(&target));

        let mut next = (**guard).clone();
        next.insert(name.to_string(), entry);
        *guard = Arc::new(next);

        Ok(target)
    }

    /// Latest version of `name`
    pub async fn resolve(&self, name: &str) -> Result<Arc<InvocationTarget>, RegistryError> {
        let targets = Arc::clone(&*self.targets.read().await);
        targets
            .get(name)
            .and_then(|entry| entry.versions.get(&entry.latest).cloned())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Resolve a latest or pinned reference
    pub async fn resolve_ref(
        &self,
        target: &TargetRef,
    ) -> Result<Arc<InvocationTarget>, RegistryError> {
        let Some(version) = target.version else {
            return self.resolve(&target.name).await;
        };
        let targets = Arc::clone(&*self.targets.read().await);
        targets
            .get(&target.name)
            .and_then(|entry| entry.versions.get(&version).cloned())
            .ok_or_else(|| RegistryError::NotFound(target.to_string()))
    }

    /// Drop superseded versions that no live reference pins
    ///
    /// The latest version of every name is always kept. Returns the number of
    /// versions removed.
    pub async fn prune(&self, live: &HashSet<TargetRef>) -> usize {
        let mut guard = self.targets.write().await;
        let mut next = (**guard).clone();
        let mut removed = 0;

        for (name, entry) in &mut next {
            let latest = entry.latest;
            let before = entry.versions.len();
            entry.versions.retain(|version, _| {
                *version == latest || live.contains(&TargetRef::pinned(name, *version))
            });
            removed += before - entry.versions.len();
        }

        if removed > 0 {
            *guard = Arc::new(next);
        }
        removed
    }

    /// Every registered version, sorted by name then version
    pub async fn list(&self) -> Vec<Arc<InvocationTarget>> {
        let targets = Arc::clone(&*self.targets.read().await);
        let mut list: Vec<_> = targets
            .values()
            .flat_map(|entry| entry.versions.values().cloned())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        list
    }
}
