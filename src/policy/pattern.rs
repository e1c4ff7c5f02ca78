//! Wildcard pattern matching
//!
//! Principals, actions, targets and source scopes are matched with `*`
//! wildcards, where `*` matches any run of characters (including `/`).

/// Check whether `value` matches `pattern`
///
/// Examples:
/// - `"*"` matches anything
/// - `"lambda:*"` matches `"lambda:InvokeFunction"`
/// - `"api123/*/*"` matches `"api123/$default/GET/"`
pub fn glob_match(pattern: &str, value: &str) -> bool {
    let p = pattern.as_bytes();
    let v = value.as_bytes();

    let mut pi = 0;
    let mut vi = 0;
    // Position of the last `*` seen and the value index it was tried at
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while vi < v.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            mark = vi;
            pi += 1;
        } else if pi < p.len() && p[pi] == v[vi] {
            pi += 1;
            vi += 1;
        } else if let Some(s) = star {
            // Let the last star swallow one more character and retry
            pi = s + 1;
            mark += 1;
            vi = mark;
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert!(glob_match("greet", "greet"));
        assert!(!glob_match("greet", "greeter"));
        assert!(!glob_match("greet", "gree"));
    }

    #[test]
    fn test_catch_all() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "apigateway.amazonaws.com"));
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert!(glob_match("lambda:*", "lambda:InvokeFunction"));
        assert!(!glob_match("lambda:*", "sts:AssumeRole"));
        assert!(glob_match("*.amazonaws.com", "lambda.amazonaws.com"));
    }

    #[test]
    fn test_source_scope() {
        assert!(glob_match("api123/*/*", "api123/$default/GET/"));
        assert!(glob_match("api123/*/GET/*", "api123/prod/GET/users/{id}"));
        assert!(!glob_match("api123/*/GET/*", "api123/prod/POST/users"));
        assert!(!glob_match("api123/*/*", "api999/prod/GET/"));
    }

    #[test]
    fn test_backtracking() {
        assert!(glob_match("a*b*c", "aXbYbZc"));
        assert!(!glob_match("a*b*c", "aXbYbZ"));
    }
}
