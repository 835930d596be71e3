//! Hierarchical scope locators (`milestone/phase/plan/task`) and the matching rules used by
//! the decision ledger.

/// Separator between scope segments.
pub const SEPARATOR: char = '/';

/// Whether a decision's affected-scope `pattern` applies to `scope`.
///
/// - `*` matches everything.
/// - A trailing `*` is a raw prefix wildcard: `02-*` matches `02-03`.
/// - Otherwise the pattern matches itself and every descendant: `02` matches `02/03/2`
///   but not `020`.
pub fn matches(pattern: &str, scope: &str) -> bool {
    let pattern = normalize(pattern);
    let scope = normalize(scope);
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return scope.starts_with(prefix);
    }
    if scope == pattern {
        return true;
    }
    scope
        .strip_prefix(pattern)
        .is_some_and(|rest| rest.starts_with(SEPARATOR))
}

/// Trim whitespace and surrounding separators so `/02/03/` and `02/03` compare equal.
pub fn normalize(scope: &str) -> &str {
    scope.trim().trim_matches(SEPARATOR)
}

/// Join non-empty segments into a scope string.
pub fn join<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments
        .into_iter()
        .map(normalize)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
