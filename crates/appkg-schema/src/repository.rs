//! Repository configuration entries.

use serde::{Deserialize, Serialize};

/// A configured remote repository.
///
/// Repositories are consulted in ascending `priority`; ties are broken by
/// `name`, which must be unique within a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryEntry {
    /// Unique name; also the cache subdirectory for this repository.
    pub name: String,
    /// Base URL, without trailing slash.
    pub url: String,
    /// Lower values are tried first.
    #[serde(default)]
    pub priority: i32,
}

impl RepositoryEntry {
    /// Create a repository entry, trimming any trailing `/` from `url`.
    pub fn new(name: impl Into<String>, url: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            url: url.into().trim_end_matches('/').to_string(),
            priority,
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

impl Ord for RepositoryEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.url.cmp(&other.url))
    }
}

impl PartialOrd for RepositoryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for RepositoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_priority_then_name() {
        let mut repos = vec![
            RepositoryEntry::new("zeta", "http://z", 1),
            RepositoryEntry::new("beta", "http://b", 5),
            RepositoryEntry::new("alpha", "http://a", 1),
        ];
        repos.sort();
        let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta", "beta"]);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let repo = RepositoryEntry::new("main", "https://repo.example.com/", 0);
        assert_eq!(repo.base_url(), "https://repo.example.com");
    }
}
