//! Version ordering.
//!
//! Versions are compared as plain strings, so "9.0.0" sorts after
//! "10.0.0". The names below say so on purpose; switching to semantic
//! ordering would change which version `Latest` resolves to.

/// Whether `candidate` should replace `current` as the latest version.
///
/// An empty `current` is always replaced.
pub fn is_lexicographically_newer(candidate: &str, current: &str) -> bool {
    current.is_empty() || candidate > current
}

/// The greatest version string, if any.
pub fn resolve_lexicographically_latest<I, S>(versions: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    versions
        .into_iter()
        .map(|v| v.as_ref().to_string())
        .max()
}
