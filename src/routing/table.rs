//! Route table module
//!
//! Builds an immutable, validated route table from declarative route and
//! integration records. Every ambiguity is rejected at build time so that
//! matching is a deterministic lookup.

use hyper::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use super::matcher::{split_path, PathPattern};
use crate::integration::Integration;
use crate::registry::TargetRef;

/// Route key of the catch-all route
pub const DEFAULT_ROUTE: &str = "$default";

/// Declarative route record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// HTTP method, or "ANY"
    #[serde(default = "default_method")]
    pub method: String,
    /// Path pattern, or "$default"
    pub path: String,
    /// Integration id
    pub integration: String,
}

#[allow(clippy::missing_const_for_fn)]
fn default_method() -> String {
    "ANY".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodMatch {
    Any,
    Exact(Method),
}

impl MethodMatch {
    fn parse(method: &str) -> Result<Self, String> {
        let upper = method.to_ascii_uppercase();
        if upper == "ANY" {
            return Ok(Self::Any);
        }
        Method::from_bytes(upper.as_bytes())
            .map(Self::Exact)
            .map_err(|_| format!("invalid method '{method}'"))
    }

    fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(m) => m == method,
        }
    }

    const fn specificity(&self) -> u8 {
        match self {
            Self::Exact(_) => 0,
            Self::Any => 1,
        }
    }
}

impl std::fmt::Display for MethodMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "ANY"),
            Self::Exact(m) => write!(f, "{m}"),
        }
    }
}

/// A validated route
#[derive(Debug)]
pub struct Route {
    /// "GET /users/{id}" or "$default"
    pub key: String,
    pub method: MethodMatch,
    /// `None` for the `$default` route
    pub pattern: Option<PathPattern>,
    pub integration: Arc<Integration>,
}

impl Route {
    /// Path part of the route key, used in authorization scopes
    pub fn resource_path(&self) -> &str {
        self.pattern.as_ref().map_or(DEFAULT_ROUTE, PathPattern::as_str)
    }
}

/// Result of a successful match
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub path_parameters: BTreeMap<String, String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("route '{0}' conflicts with route '{1}'")]
    Conflict(String, String),
    #[error("invalid route '{key}': {reason}")]
    InvalidRoute { key: String, reason: String },
    #[error("route '{route}' references unknown integration '{integration}'")]
    UnknownIntegration { route: String, integration: String },
    #[error("integration '{0}' is defined more than once")]
    DuplicateIntegration(String),
    #[error("invalid integration '{id}': {reason}")]
    InvalidIntegration { id: String, reason: String },
}

/// Immutable route table
#[derive(Debug)]
pub struct RouteTable {
    /// Sorted by precedence: the first match is the most specific one
    routes: Vec<Arc<Route>>,
    default_route: Option<Arc<Route>>,
    integrations: BTreeMap<String, Arc<Integration>>,
}

impl RouteTable {
    /// Validate and build a route table
    pub fn build(
        routes: &[RouteSpec],
        integrations: &[Integration],
    ) -> Result<Self, RouteTableError> {
        let mut by_id = BTreeMap::new();
        for integration in integrations {
            integration
                .validate()
                .map_err(|reason| RouteTableError::InvalidIntegration {
                    id: integration.id.clone(),
                    reason,
                })?;
            if by_id
                .insert(integration.id.clone(), Arc::new(integration.clone()))
                .is_some()
            {
                return Err(RouteTableError::DuplicateIntegration(integration.id.clone()));
            }
        }

        let mut built = Vec::with_capacity(routes.len());
        let mut default_route: Option<Arc<Route>> = None;
        // Structural key → route key of the first route that claimed it
        let mut seen: HashMap<(String, String), String> = HashMap::new();

        for spec in routes {
            let route = build_route(spec, &by_id)?;

            let Some(pattern) = &route.pattern else {
                if let Some(existing) = &default_route {
                    return Err(RouteTableError::Conflict(
                        existing.key.clone(),
                        route.key.clone(),
                    ));
                }
                default_route = Some(Arc::new(route));
                continue;
            };

            let structural = (route.method.to_string(), pattern.structural_key());
            if let Some(existing) = seen.get(&structural) {
                return Err(RouteTableError::Conflict(existing.clone(), route.key.clone()));
            }
            seen.insert(structural, route.key.clone());
            built.push(Arc::new(route));
        }

        built.sort_by(|a, b| {
            let rank_a = a.pattern.as_ref().map(PathPattern::rank);
            let rank_b = b.pattern.as_ref().map(PathPattern::rank);
            rank_a
                .cmp(&rank_b)
                .then(a.method.specificity().cmp(&b.method.specificity()))
        });

        Ok(Self {
            routes: built,
            default_route,
            integrations: by_id,
        })
    }

    /// Resolve a request to its route
    ///
    /// Pure function of (method, path) for a given table.
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let segments = split_path(path);

        for route in &self.routes {
            if !route.method.matches(method) {
                continue;
            }
            let Some(pattern) = &route.pattern else {
                continue;
            };
            if let Some(path_parameters) = pattern.match_segments(&segments) {
                return Some(RouteMatch {
                    route: Arc::clone(route),
                    path_parameters,
                });
            }
        }

        self.default_route.as_ref().map(|route| RouteMatch {
            route: Arc::clone(route),
            path_parameters: BTreeMap::new(),
        })
    }

    /// Routes in precedence order, `$default` last
    pub fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter().chain(self.default_route.iter())
    }

    pub fn integrations(&self) -> impl Iterator<Item = &Arc<Integration>> {
        self.integrations.values()
    }

    /// Targets this table reaches, as referenced by its integrations
    pub fn target_refs(&self) -> HashSet<TargetRef> {
        self.integrations
            .values()
            .map(|integration| integration.target.clone())
            .collect()
    }

    /// Number of routes, `$default` included
    pub fn route_count(&self) -> usize {
        self.routes.len() + usize::from(self.default_route.is_some())
    }
}

fn build_route(
    spec: &RouteSpec,
    integrations: &BTreeMap<String, Arc<Integration>>,
) -> Result<Route, RouteTableError> {
    let is_default = spec.path == DEFAULT_ROUTE;
    let key = if is_default {
        DEFAULT_ROUTE.to_string()
    } else {
        format!("{} {}", spec.method.to_ascii_uppercase(), spec.path)
    };
    let invalid = |reason: String| RouteTableError::InvalidRoute {
        key: key.clone(),
        reason,
    };

    let method = MethodMatch::parse(&spec.method).map_err(invalid)?;
    if is_default && method != MethodMatch::Any {
        return Err(invalid("the $default route cannot name a method".to_string()));
    }

    let pattern = if is_default {
        None
    } else {
        Some(PathPattern::parse(&spec.path).map_err(invalid)?)
    };

    let integration = integrations.get(&spec.integration).ok_or_else(|| {
        RouteTableError::UnknownIntegration {
            route: key.clone(),
            integration: spec.integration.clone(),
        }
    })?;

    Ok(Route {
        key,
        method,
        pattern,
        integration: Arc::clone(integration),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::CallMode;

    fn integration(id: &str) -> Integration {
        Integration {
            id: id.to_string(),
            target: TargetRef::latest(id),
            mode: CallMode::Proxy,
            timeout_ms: None,
            mapping: None,
        }
    }

    fn route(method: &str, path: &str, integration: &str) -> RouteSpec {
        RouteSpec {
            method: method.to_string(),
            path: path.to_string(),
            integration: integration.to_string(),
        }
    }

    fn table(routes: &[RouteSpec]) -> Result<RouteTable, RouteTableError> {
        RouteTable::build(routes, &[integration("a"), integration("b"), integration("c")])
    }

    fn matched(table: &RouteTable, method: Method, path: &str) -> Option<String> {
        table
            .match_route(&method, path)
            .map(|m| m.route.integration.id.clone())
    }

    #[test]
    fn test_duplicate_route_conflict() {
        let err = table(&[route("GET", "/", "a"), route("GET", "/", "b")]).unwrap_err();
        assert_eq!(err, RouteTableError::Conflict("GET /".into(), "GET /".into()));
    }

    #[test]
    fn test_structural_conflict() {
        let err = table(&[
            route("GET", "/users/{id}", "a"),
            route("get", "/users/{name}", "b"),
        ])
        .unwrap_err();
        assert!(matches!(err, RouteTableError::Conflict(_, _)));
    }

    #[test]
    fn test_same_path_different_methods() {
        let t = table(&[route("GET", "/", "a"), route("POST", "/", "b")]).unwrap();
        assert_eq!(matched(&t, Method::GET, "/"), Some("a".into()));
        assert_eq!(matched(&t, Method::POST, "/"), Some("b".into()));
        assert_eq!(matched(&t, Method::PUT, "/"), None);
    }

    #[test]
    fn test_duplicate_default_route() {
        let err = table(&[route("ANY", "$default", "a"), route("ANY", "$default", "b")])
            .unwrap_err();
        assert!(matches!(err, RouteTableError::Conflict(_, _)));
    }

    #[test]
    fn test_invalid_routes() {
        assert!(matches!(
            table(&[route("GET", "users", "a")]).unwrap_err(),
            RouteTableError::InvalidRoute { .. }
        ));
        assert!(matches!(
            table(&[route("GE T", "/", "a")]).unwrap_err(),
            RouteTableError::InvalidRoute { .. }
        ));
        assert!(matches!(
            table(&[route("GET", "$default", "a")]).unwrap_err(),
            RouteTableError::InvalidRoute { .. }
        ));
        assert_eq!(
            table(&[route("GET", "/", "zzz")]).unwrap_err(),
            RouteTableError::UnknownIntegration {
                route: "GET /".into(),
                integration: "zzz".into()
            }
        );
    }

    #[test]
    fn test_integration_errors() {
        let err = RouteTable::build(&[], &[integration("a"), integration("a")]).unwrap_err();
        assert_eq!(err, RouteTableError::DuplicateIntegration("a".into()));

        let mut mapped = integration("m");
        mapped.mode = CallMode::Mapped;
        assert!(matches!(
            RouteTable::build(&[], &[mapped]).unwrap_err(),
            RouteTableError::InvalidIntegration { .. }
        ));
    }

    #[test]
    fn test_literal_beats_param_beats_greedy() {
        let t = table(&[
            route("GET", "/users/{rest+}", "c"),
            route("GET", "/users/{id}", "b"),
            route("GET", "/users/me", "a"),
        ])
        .unwrap();
        assert_eq!(matched(&t, Method::GET, "/users/me"), Some("a".into()));
        assert_eq!(matched(&t, Method::GET, "/users/7"), Some("b".into()));
        assert_eq!(matched(&t, Method::GET, "/users/7/posts"), Some("c".into()));
    }

    #[test]
    fn test_exact_method_beats_any() {
        let t = table(&[route("ANY", "/items", "a"), route("GET", "/items", "b")]).unwrap();
        assert_eq!(matched(&t, Method::GET, "/items"), Some("b".into()));
        assert_eq!(matched(&t, Method::DELETE, "/items"), Some("a".into()));
    }

    #[test]
    fn test_default_route_is_last_resort() {
        let t = table(&[route("GET", "/", "a"), route("ANY", "$default", "b")]).unwrap();
        assert_eq!(matched(&t, Method::GET, "/"), Some("a".into()));
        assert_eq!(matched(&t, Method::POST, "/"), Some("b".into()));
        assert_eq!(matched(&t, Method::GET, "/anything/else"), Some("b".into()));
        assert_eq!(t.route_count(), 2);
        assert_eq!(t.routes().last().unwrap().key, DEFAULT_ROUTE);
    }

    #[test]
    fn test_match_is_deterministic() {
        let t = table(&[
            route("GET", "/a/{x}/c", "a"),
            route("GET", "/{y}/b/c", "b"),
            route("ANY", "/{proxy+}", "c"),
        ])
        .unwrap();
        for _ in 0..10 {
            assert_eq!(matched(&t, Method::GET, "/a/b/c"), Some("a".into()));
            assert_eq!(matched(&t, Method::GET, "/z/b/c"), Some("b".into()));
            assert_eq!(matched(&t, Method::GET, "/z/q/c"), Some("c".into()));
        }
    }

    #[test]
    fn test_path_parameters() {
        let t = table(&[route("GET", "/users/{id}", "a")]).unwrap();
        let m = t.match_route(&Method::GET, "/users/42").unwrap();
        assert_eq!(m.path_parameters["id"], "42");
        assert_eq!(m.route.key, "GET /users/{id}");
        assert_eq!(m.route.resource_path(), "/users/{id}");
    }

    #[test]
    fn test_integrations_are_shared() {
        let t = table(&[route("GET", "/x", "a"), route("POST", "/x", "a")]).unwrap();
        let get = t.match_route(&Method::GET, "/x").unwrap();
        let post = t.match_route(&Method::POST, "/x").unwrap();
        assert!(Arc::ptr_eq(&get.route.integration, &post.route.integration));
    }
}
