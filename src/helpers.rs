#![warn(missing_docs)]

/// Matches a mount pattern against a path. A `*` in the pattern matches any
/// run of characters; patterns without `*` must match exactly.
pub(crate) fn wildcard_matches(pattern: &str, path: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == path,
        Some((pre, post)) => {
            path.len() >= pre.len() + post.len()
                && path.starts_with(pre)
                && path.ends_with(post)
        }
    }
}

/// Joins a mount prefix and a route path: `("/api", "/users")` becomes
/// `/api/users`, and mounting `"/"` keeps the prefix itself addressable.
pub(crate) fn join_paths(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if path == "/" {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{}{}", prefix, path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_matches("/ws", "/ws"));
        assert!(!wildcard_matches("/ws", "/ws/room"));
        assert!(wildcard_matches("/ws/*", "/ws/room"));
        assert!(wildcard_matches("/ws/*", "/ws/a/b"));
        assert!(!wildcard_matches("/ws/*", "/api"));
        assert!(wildcard_matches("/*/feed", "/news/feed"));
    }

    #[test]
    fn path_joining() {
        assert_eq!(join_paths("/api", "/users"), "/api/users");
        assert_eq!(join_paths("/api/", "/users"), "/api/users");
        assert_eq!(join_paths("/api", "/"), "/api");
        assert_eq!(join_paths("/", "/users"), "/users");
        assert_eq!(join_paths("/", "/"), "/");
    }
}
