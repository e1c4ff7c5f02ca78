//! Permission policy module
//!
//! Holds per-(caller, target, scope) authorization statements and the single
//! evaluation algorithm used everywhere in the gateway:
//! an explicit Deny wins, otherwise an Allow is required (default-deny).

mod pattern;

pub use pattern::glob_match;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Action checked before a target is invoked
pub const INVOKE_ACTION: &str = "lambda:InvokeFunction";

/// Effect of a single statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Allow,
    Deny,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "ALLOW"),
            Self::Deny => write!(f, "DENY"),
        }
    }
}

/// Combine the effects of every matching statement
pub fn evaluate<I>(effects: I) -> Decision
where
    I: IntoIterator<Item = Effect>,
{
    let mut allowed = false;
    for effect in effects {
        match effect {
            Effect::Deny => return Decision::Deny,
            Effect::Allow => allowed = true,
        }
    }
    if allowed {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// Resource-based permission statement attached to an invocation target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatement {
    /// Statement id, unique within the store
    pub sid: String,
    #[serde(default = "default_action")]
    pub action: String,
    /// Caller principal pattern (e.g. "apigateway.amazonaws.com")
    pub principal: String,
    /// Target pattern: "greet" covers every version, "greet:2" one version
    pub target: String,
    /// Source scope pattern (e.g. "api123/*/*"); absent means any source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub effect: Effect,
}

#[allow(clippy::missing_const_for_fn)]
fn default_action() -> String {
    INVOKE_ACTION.to_string()
}

/// A single authorization question
#[derive(Debug, Clone, Copy)]
pub struct AuthzRequest<'a> {
    pub caller: &'a str,
    pub action: &'a str,
    pub target_name: &'a str,
    pub target_version: u64,
    /// Requesting context: `<api_id>/<stage>/<METHOD><route path>`
    pub source: &'a str,
}

impl PermissionStatement {
    /// Check whether this statement applies to the request
    pub fn matches(&self, req: &AuthzRequest<'_>) -> bool {
        if !glob_match(&self.principal, req.caller) || !glob_match(&self.action, req.action) {
            return false;
        }
        if !self.matches_target(req.target_name, req.target_version) {
            return false;
        }
        // An unmatched scope is treated as no statement
        self.source
            .as_deref()
            .is_none_or(|scope| glob_match(scope, req.source))
    }

    fn matches_target(&self, name: &str, version: u64) -> bool {
        if self.target.contains(':') {
            glob_match(&self.target, &format!("{name}:{version}"))
        } else {
            glob_match(&self.target, name)
        }
    }
}

/// Evaluate a request against a set of statements
pub fn authorize(statements: &[PermissionStatement], req: &AuthzRequest<'_>) -> Decision {
    evaluate(
        statements
            .iter()
            .filter(|stmt| stmt.matches(req))
            .map(|stmt| stmt.effect),
    )
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("statement '{0}' already exists")]
    DuplicateSid(String),
    #[error("statement '{0}' not found")]
    UnknownSid(String),
}

/// Copy-on-write permission store
///
/// Readers clone the current `Arc` and evaluate without holding the lock.
pub struct PolicyStore {
    statements: RwLock<Arc<Vec<PermissionStatement>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            statements: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Current statements
    pub async fn statements(&self) -> Arc<Vec<PermissionStatement>> {
        Arc::clone(&*self.statements.read().await)
    }

    /// Add a statement, rejecting a duplicate sid
    pub async fn add_statement(&self, statement: PermissionStatement) -> Result<(), PolicyError> {
        let mut guard = self.statements.write().await;
        if guard.iter().any(|s| s.sid == statement.sid) {
            return Err(PolicyError::DuplicateSid(statement.sid));
        }
        let mut next = (**guard).clone();
        next.push(statement);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Remove a statement by sid
    pub async fn remove_statement(&self, sid: &str) -> Result<PermissionStatement, PolicyError> {
        let mut guard = self.statements.write().await;
        let Some(index) = guard.iter().position(|s| s.sid == sid) else {
            return Err(PolicyError::UnknownSid(sid.to_string()));
        };
        let mut next = (**guard).clone();
        let removed = next.remove(index);
        *guard = Arc::new(next);
        Ok(removed)
    }

    pub async fn authorize(&self, req: &AuthzRequest<'_>) -> Decision {
        let statements = self.statements().await;
        authorize(&statements, req)
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
