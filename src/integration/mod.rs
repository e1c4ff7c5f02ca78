//! Integration binding module
//!
//! An integration couples a route to an invocation target and fixes the call
//! semantics. Every invocation goes through [`invoke`], which authorizes the
//! gateway against the resolved target before anything is called.

pub mod envelope;
mod mapping;

pub use envelope::{HandlerResponse, ProxyEvent, RequestEnvelope};
pub use mapping::Mapping;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::dispatch::{DispatchError, FaultReason};
use crate::function::HandlerCatalog;
use crate::logger;
use crate::policy::{AuthzRequest, Decision, PolicyStore, INVOKE_ACTION};
use crate::registry::{TargetRef, TargetRegistry};

/// How the request reaches the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    /// Forward the full envelope, return the target's response unchanged
    #[default]
    Proxy,
    /// Apply the declared field mapping before and after invocation
    Mapped,
}

impl std::fmt::Display for CallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proxy => write!(f, "PROXY"),
            Self::Mapped => write!(f, "MAPPED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    pub target: TargetRef,
    #[serde(default)]
    pub mode: CallMode,
    /// Per-invocation timeout; the gateway default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Mapping>,
}

impl Integration {
    /// Check the integration is internally consistent
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("integration id must not be empty".to_string());
        }
        if self.timeout_ms == Some(0) {
            return Err("timeout_ms must be greater than zero".to_string());
        }
        match (self.mode, &self.mapping) {
            (CallMode::Proxy, Some(_)) => {
                Err("a mapping is only valid for mapped integrations".to_string())
            }
            (CallMode::Mapped, None) => Err("mapped integrations require a mapping".to_string()),
            (CallMode::Mapped, Some(mapping)) => mapping.validate(),
            (CallMode::Proxy, None) => Ok(()),
        }
    }
}

/// Stores and settings an invocation needs
pub struct Bindings<'a> {
    pub policy: &'a PolicyStore,
    pub targets: &'a TargetRegistry,
    pub catalog: &'a HandlerCatalog,
    /// Principal the gateway presents when invoking targets
    pub caller_principal: &'a str,
    pub default_timeout: Duration,
}

/// Invoke the integration's target with `event`
///
/// `source` is the requesting context checked against permission scopes.
/// A denied call returns [`DispatchError::Forbidden`] without touching the
/// target. The call is made at most once.
pub async fn invoke(
    integration: &Integration,
    event: ProxyEvent,
    source: &str,
    bindings: &Bindings<'_>,
) -> Result<HandlerResponse, DispatchError> {
    let target = bindings
        .targets
        .resolve_ref(&integration.target)
        .await
        .map_err(|_| DispatchError::TargetNotFound(integration.target.to_string()))?;
    let qualified = target.qualified_name();

    let decision = bindings
        .policy
        .authorize(&AuthzRequest {
            caller: bindings.caller_principal,
            action: INVOKE_ACTION,
            target_name: &target.name,
            target_version: target.version,
            source,
        })
        .await;
    if decision == Decision::Deny {
        logger::log_denied(bindings.caller_principal, &qualified, source);
        return Err(DispatchError::Forbidden { target: qualified });
    }

    if !target.identity.may_assume(bindings.targets.execution_principal()) {
        return Err(DispatchError::fault(
            &qualified,
            FaultReason::ExecutionRole,
            format!("identity '{}' cannot be assumed", target.identity.name),
        ));
    }

    let Some(handler) = bindings.catalog.resolve(&target.endpoint) else {
        return Err(DispatchError::fault(
            &qualified,
            FaultReason::EndpointUnavailable,
            format!("no handler for endpoint '{}'", target.endpoint),
        ));
    };

    let payload = match (integration.mode, &integration.mapping) {
        (CallMode::Mapped, Some(mapping)) => mapping.map_request(&event),
        _ => serde_json::to_value(&event).map_err(|e| {
            DispatchError::fault(&qualified, FaultReason::InvalidRequest, e.to_string())
        })?,
    };

    let timeout = integration
        .timeout_ms
        .map_or(bindings.default_timeout, Duration::from_millis);

    let result = match tokio::time::timeout(timeout, handler.invoke(payload)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            return Err(DispatchError::fault(&qualified, FaultReason::HandlerError, e.message));
        }
        Err(_) => {
            return Err(DispatchError::fault(
                &qualified,
                FaultReason::Timeout,
                format!("no response within {}ms", timeout.as_millis()),
            ));
        }
    };

    match (integration.mode, &integration.mapping) {
        (CallMode::Mapped, Some(mapping)) => mapping
            .map_response(result)
            .map_err(|e| DispatchError::fault(&qualified, FaultReason::HandlerError, e)),
        _ => HandlerResponse::from_result(result)
            .map_err(|e| DispatchError::fault(&qualified, FaultReason::InvalidResponse, e)),
    }
}
