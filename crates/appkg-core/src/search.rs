//! Multi-source search.
//!
//! Three sources are consulted: the local store, live repositories (only
//! for an exact `org/app` query) and the metadata cache. When the same
//! `(org, app, version)` appears more than once the row from the
//! higher-precedence source wins.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, warn};

use appkg_schema::{
    PackageMetadataRecord, RepositoryEntry, SearchResultItem, SearchSource, validate_segment,
};

use crate::cache::ArchiveCache;
use crate::repository::RepositoryClient;
use crate::store::LocalStore;

/// What the caller is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// An exact `org/app` pair. Only this form reaches live repositories.
    Package {
        /// Organization to match.
        organization: String,
        /// App name to match.
        app_name: String,
    },
    /// Case-insensitive substring over org, app and description. Empty
    /// text matches everything.
    Text(String),
}

impl SearchQuery {
    /// `org/app` with no whitespace, where both halves are single path
    /// segments, becomes [`SearchQuery::Package`]; anything else is free
    /// text.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if !input.contains(char::is_whitespace) {
            if let Some((org, app)) = input.split_once('/') {
                if validate_segment("organization", org).is_ok()
                    && validate_segment("app_name", app).is_ok()
                {
                    return Self::Package {
                        organization: org.to_string(),
                        app_name: app.to_string(),
                    };
                }
            }
        }
        Self::Text(input.to_string())
    }

    /// Whether a row for `org/app` with `description` belongs in the results.
    pub fn matches(&self, org: &str, app: &str, description: &str) -> bool {
        match self {
            Self::Package {
                organization,
                app_name,
            } => organization == org && app_name == app,
            Self::Text(text) => {
                let needle = text.to_lowercase();
                [org, app, description]
                    .iter()
                    .any(|hay| hay.to_lowercase().contains(&needle))
            }
        }
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package {
                organization,
                app_name,
            } => write!(f, "{organization}/{app_name}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

/// Rows for every complete version in the local store.
pub fn local_results(store: &LocalStore, query: &SearchQuery) -> Vec<SearchResultItem> {
    let entries = match store.entries() {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Skipping local store in search: {}", e);
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let description = entry
                .metadata
                .map(|m| m.description)
                .unwrap_or_default();
            query
                .matches(&entry.organization, &entry.app_name, &description)
                .then(|| {
                    SearchResultItem::new(
                        SearchSource::LocalStore,
                        entry.organization,
                        entry.app_name,
                        entry.version,
                        description,
                    )
                })
        })
        .collect()
}

/// Rows from a live metadata fetch on each repository. Text queries do
/// not touch the network.
pub fn remote_results(
    client: &RepositoryClient,
    repos: &[RepositoryEntry],
    query: &SearchQuery,
) -> Vec<SearchResultItem> {
    let SearchQuery::Package {
        organization,
        app_name,
    } = query
    else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for repo in repos {
        match client.fetch_metadata(repo, organization, app_name) {
            Ok(Some(record)) => items.extend(record_rows(SearchSource::Remote, &record)),
            Ok(None) => {}
            Err(e) => warn!("Skipping repository '{}' in search: {}", repo.name, e),
        }
    }
    items
}

/// Rows from every cached metadata record that matches.
pub fn cache_results(cache: &ArchiveCache, query: &SearchQuery) -> Vec<SearchResultItem> {
    let records = match cache.cached_records() {
        Ok(records) => records,
        Err(e) => {
            warn!("Skipping metadata cache in search: {}", e);
            return Vec::new();
        }
    };

    records
        .iter()
        .filter(|c| {
            query.matches(
                &c.record.organization,
                &c.record.app_name,
                &c.record.description,
            )
        })
        .flat_map(|c| record_rows(SearchSource::Cache, &c.record))
        .collect()
}

fn record_rows(source: SearchSource, record: &PackageMetadataRecord) -> Vec<SearchResultItem> {
    record
        .versions
        .keys()
        .map(|version| {
            SearchResultItem::new(
                source,
                &record.organization,
                &record.app_name,
                version,
                &record.description,
            )
        })
        .collect()
}

/// Deduplicate by `(org, app, version)`, keeping the best-ranked row, and
/// sort by rank, org, app, version.
pub fn merge_results(mut items: Vec<SearchResultItem>) -> Vec<SearchResultItem> {
    items.sort_by(|a, b| {
        (a.source_rank, &a.organization, &a.app_name, &a.version).cmp(&(
            b.source_rank,
            &b.organization,
            &b.app_name,
            &b.version,
        ))
    });

    let mut seen = HashSet::new();
    let before = items.len();
    items.retain(|item| {
        seen.insert((
            item.organization.clone(),
            item.app_name.clone(),
            item.version.clone(),
        ))
    });
    debug!("Merged {} search rows into {}", before, items.len());
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distinguishes_package_and_text() {
        assert_eq!(
            SearchQuery::parse("acme/widgets"),
            SearchQuery::Package {
                organization: "acme".to_string(),
                app_name: "widgets".to_string()
            }
        );
        assert_eq!(SearchQuery::parse("widgets"), SearchQuery::Text("widgets".into()));
        assert_eq!(
            SearchQuery::parse("acme/widgets toolkit"),
            SearchQuery::Text("acme/widgets toolkit".into())
        );
        assert_eq!(SearchQuery::parse("a/b/c"), SearchQuery::Text("a/b/c".into()));
        assert_eq!(SearchQuery::parse("/widgets"), SearchQuery::Text("/widgets".into()));
        assert_eq!(
            SearchQuery::parse("../widgets"),
            SearchQuery::Text("../widgets".into())
        );
    }

    #[test]
    fn text_match_is_case_insensitive() {
        let query = SearchQuery::Text("TOOL".into());
        assert!(query.matches("acme", "widgets", "Widget toolkit"));
        assert!(!query.matches("acme", "widgets", "Gadgets"));
        assert!(SearchQuery::Text(String::new()).matches("a", "b", ""));
    }

    #[test]
    fn package_match_is_exact() {
        let query = SearchQuery::parse("acme/widgets");
        assert!(query.matches("acme", "widgets", ""));
        assert!(!query.matches("acme", "widgets-extra", ""));
    }

    #[test]
    fn merge_keeps_lowest_rank_and_sorts() {
        let items = vec![
            SearchResultItem::new(SearchSource::Cache, "acme", "widgets", "1.0.0", "cached"),
            SearchResultItem::new(SearchSource::Cache, "acme", "widgets", "0.9.0", "cached"),
            SearchResultItem::new(SearchSource::Remote, "acme", "widgets", "1.0.0", "remote"),
            SearchResultItem::new(SearchSource::LocalStore, "acme", "widgets", "1.0.0", "local"),
            SearchResultItem::new(SearchSource::Remote, "acme", "gadgets", "2.0.0", "remote"),
        ];

        let merged = merge_results(items);
        let rows: Vec<(SearchSource, &str, &str)> = merged
            .iter()
            .map(|i| (i.source, i.app_name.as_str(), i.version.as_str()))
            .collect();
        assert_eq!(
            rows,
            [
                (SearchSource::LocalStore, "widgets", "1.0.0"),
                (SearchSource::Remote, "gadgets", "2.0.0"),
                (SearchSource::Cache, "widgets", "0.9.0"),
            ]
        );
        assert_eq!(merged[0].source_rank, 1);
    }
}
