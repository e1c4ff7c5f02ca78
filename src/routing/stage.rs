//! Stage resolution module
//!
//! Picks the stage serving a request path. A named stage serves
//! `/<stage>/...` with the prefix stripped; the `$default` stage serves
//! every path no named stage claims.

/// Name of the stage that serves unprefixed paths
pub const DEFAULT_STAGE: &str = "$default";

/// Resolve the stage for `path` among `stages`
///
/// Matching priority:
/// 1. Named stage equal to the first path segment
/// 2. `$default` stage, with the path unchanged
///
/// Returns the stage name and the path the route table should see.
pub fn resolve_stage<'a, I>(path: &str, stages: I) -> Option<(&'a str, String)>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    let trimmed = path.trim_start_matches('/');
    let (first, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));

    // First pass: named stage prefix
    if !first.is_empty() && first != DEFAULT_STAGE {
        if let Some(stage) = stages.clone().into_iter().find(|s| *s == first) {
            return Some((stage, format!("/{rest}")));
        }
    }

    // Second pass: default stage
    stages
        .into_iter()
        .find(|s| *s == DEFAULT_STAGE)
        .map(|stage| (stage, normalize(path)))
}

fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_stage_strips_prefix() {
        let stages = ["prod", DEFAULT_STAGE];
        assert_eq!(
            resolve_stage("/prod/users/7", stages),
            Some(("prod", "/users/7".to_string()))
        );
        assert_eq!(resolve_stage("/prod", stages), Some(("prod", "/".to_string())));
    }

    #[test]
    fn test_default_stage_keeps_path() {
        let stages = ["prod", DEFAULT_STAGE];
        assert_eq!(
            resolve_stage("/users/7", stages),
            Some((DEFAULT_STAGE, "/users/7".to_string()))
        );
        assert_eq!(resolve_stage("/", stages), Some((DEFAULT_STAGE, "/".to_string())));
    }

    #[test]
    fn test_default_stage_name_is_not_a_prefix() {
        let stages = [DEFAULT_STAGE];
        assert_eq!(
            resolve_stage("/$default/x", stages),
            Some((DEFAULT_STAGE, "/$default/x".to_string()))
        );
    }

    #[test]
    fn test_no_stage() {
        let stages = ["prod"];
        assert_eq!(resolve_stage("/dev/users", stages), None);
        assert_eq!(resolve_stage("/", stages), None);
    }
}
