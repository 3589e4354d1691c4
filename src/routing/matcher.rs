//! Synthetic application-path matching.
//!
//! Application URLs live under `<origin>/app_<opaque-id>/...`. Matching is
//! plain string scanning, no regex: the last `app_<id>/` segment in the path
//! wins, mirroring the greedy match of the original routing convention.

/// Result of matching a request path against the application-prefix pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPath {
    /// The registry key, e.g. `app_abc123/`.
    pub prefix: String,
    /// The path with everything up to and including the prefix stripped,
    /// always starting with `/`. The application never sees its prefix.
    pub stripped: String,
    /// Whether the stripped path is the application's root document.
    pub is_root: bool,
}

/// Match a request path against `.../app_<id>/...`.
///
/// Returns `None` when the path carries no complete prefix — an `app_<id>`
/// segment without its trailing slash is not application traffic.
pub fn match_app_path(path: &str) -> Option<AppPath> {
    let mut found: Option<(usize, usize)> = None; // (start, end-of-prefix)

    for (at, _) in path.match_indices("app_") {
        // Must begin a path segment.
        if at > 0 && path.as_bytes()[at - 1] != b'/' {
            continue;
        }
        // Must be a complete segment with a non-empty id and trailing slash.
        match path[at..].find('/') {
            Some(rel) if rel > "app_".len() => found = Some((at, at + rel + 1)),
            _ => {}
        }
    }

    let (start, end) = found?;
    let stripped = format!("/{}", &path[end..]);
    Some(AppPath {
        prefix: path[start..end].to_string(),
        is_root: stripped == "/",
        stripped,
    })
}
