//! Search result rows and their sources.

use serde::{Deserialize, Serialize};

/// Where a search result came from. The rank doubles as precedence when
/// the same `(org, app, version)` shows up in more than one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchSource {
    /// Installed in the local package store.
    LocalStore,
    /// Reported by a live repository query.
    Remote,
    /// Found in the on-disk metadata cache.
    Cache,
}

impl SearchSource {
    /// Precedence rank: 1 is highest.
    pub fn rank(self) -> u8 {
        match self {
            Self::LocalStore => 1,
            Self::Remote => 2,
            Self::Cache => 3,
        }
    }
}

impl std::fmt::Display for SearchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalStore => write!(f, "local-store"),
            Self::Remote => write!(f, "remote"),
            Self::Cache => write!(f, "cache"),
        }
    }
}

/// One row of a merged search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultItem {
    /// Source that produced this row.
    pub source: SearchSource,
    /// Owning organization.
    pub organization: String,
    /// App name.
    pub app_name: String,
    /// Version string.
    pub version: String,
    /// Short summary, if the source knows one.
    pub description: String,
    /// `source.rank()`, kept for display and sorting.
    pub source_rank: u8,
}

impl SearchResultItem {
    /// Build a row; `source_rank` is derived from `source`.
    pub fn new(
        source: SearchSource,
        organization: impl Into<String>,
        app_name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source,
            organization: organization.into(),
            app_name: app_name.into(),
            version: version.into(),
            description: description.into(),
            source_rank: source.rank(),
        }
    }

    /// The deduplication key.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.organization, &self.app_name, &self.version)
    }
}
