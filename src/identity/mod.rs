//! Identity & trust store
//!
//! Every invocation target runs under exactly one identity. The identity's
//! trust statement lists which principals may assume it; the execution
//! platform must be able to assume a target's identity before the target can
//! be registered or invoked.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::policy::{self, glob_match, Decision, Effect};

/// Action evaluated by [`Identity::may_assume`]
pub const ASSUME_ROLE_ACTION: &str = "sts:AssumeRole";

/// One (principal, action, effect) entry of a trust statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEntry {
    pub principal: String,
    #[serde(default = "default_trust_action")]
    pub action: String,
    #[serde(default)]
    pub effect: Effect,
}

#[allow(clippy::missing_const_for_fn)]
fn default_trust_action() -> String {
    ASSUME_ROLE_ACTION.to_string()
}

/// Named identity with its trust statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub trust: Vec<TrustEntry>,
}

impl Identity {
    /// Whether `principal` may assume this identity
    ///
    /// True only on an explicit Allow for `sts:AssumeRole` and no Deny.
    pub fn may_assume(&self, principal: &str) -> bool {
        let effects = self
            .trust
            .iter()
            .filter(|entry| {
                glob_match(&entry.action, ASSUME_ROLE_ACTION)
                    && glob_match(&entry.principal, principal)
            })
            .map(|entry| entry.effect);
        policy::evaluate(effects) == Decision::Allow
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity '{0}' already exists with a different trust statement")]
    Conflict(String),
}

/// Registered identities, keyed by name
///
/// Identities are never mutated once registered.
pub struct IdentityStore {
    identities: RwLock<Arc<HashMap<String, Arc<Identity>>>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self {
            identities: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Register an identity
    ///
    /// Registering an identical identity again returns the existing record.
    pub async fn register_identity(&self, identity: Identity) -> Result<Arc<Identity>, IdentityError> {
        let mut guard = self.identities.write().await;
        if let Some(existing) = guard.get(&identity.name) {
            if **existing == identity {
                return Ok(Arc::clone(existing));
            }
            return Err(IdentityError::Conflict(identity.name));
        }

        let identity = Arc::new(identity);
        let mut next = (**guard).clone();
        next.insert(identity.name.clone(), Arc::clone(&identity));
        *guard = Arc::new(next);
        Ok(identity)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Identity>> {
        self.identities.read().await.get(name).cloned()
    }

    /// All identities, sorted by name
    pub async fn list(&self) -> Vec<Arc<Identity>> {
        let identities = Arc::clone(&*self.identities.read().await);
        let mut list: Vec<_> = identities.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new()
    }
}
