//! Per-invocation configuration.
//!
//! A `Config` is built once by the caller (usually from a config file the
//! caller loads itself) and threaded through [`crate::Resolver`] and
//! [`crate::RepositoryClient`]. Nothing here is global.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use appkg_schema::{RepositoryEntry, validate_segment};

use crate::paths;

/// Default timeout for metadata requests.
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 30;

/// Default timeout for archive uploads and downloads.
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 300;

/// Errors raised while building or validating a [`Config`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML document is malformed or has the wrong shape.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Neither `APPKG_HOME` nor a home directory is available.
    #[error("Could not determine home directory. Set APPKG_HOME to override.")]
    NoHome,

    /// Two repositories share a name.
    #[error("Duplicate repository name: {0}")]
    DuplicateRepository(String),

    /// A repository's name cannot be used as a cache directory.
    #[error("Invalid repository name '{0}': must be a single path segment")]
    InvalidRepositoryName(String),

    /// A repository has no URL.
    #[error("Repository '{0}' has an empty URL")]
    EmptyUrl(String),

    /// A lookup named a repository that is not configured.
    #[error("No repository named '{0}' is configured")]
    UnknownRepository(String),
}

/// Base paths, repositories and network timeouts for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the local package store.
    pub apps_base_path: PathBuf,
    /// Root of the repository cache.
    pub cache_base_path: PathBuf,
    /// Configured repositories, in any order.
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
    /// Timeout for metadata GET/PUT requests.
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,
    /// Timeout for archive transfers.
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
}

fn default_metadata_timeout() -> u64 {
    DEFAULT_METADATA_TIMEOUT_SECS
}

fn default_transfer_timeout() -> u64 {
    DEFAULT_TRANSFER_TIMEOUT_SECS
}

impl Config {
    /// Config rooted at explicit paths, with no repositories.
    pub fn new(apps_base_path: impl Into<PathBuf>, cache_base_path: impl Into<PathBuf>) -> Self {
        Self {
            apps_base_path: apps_base_path.into(),
            cache_base_path: cache_base_path.into(),
            repositories: Vec::new(),
            metadata_timeout_secs: DEFAULT_METADATA_TIMEOUT_SECS,
            transfer_timeout_secs: DEFAULT_TRANSFER_TIMEOUT_SECS,
        }
    }

    /// Config rooted at `$APPKG_HOME` (or `~/.appkg`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHome`] if neither is resolvable.
    pub fn from_home() -> Result<Self, ConfigError> {
        let home = paths::try_appkg_home().ok_or(ConfigError::NoHome)?;
        Ok(Self::new(
            paths::default_apps_path(&home),
            paths::default_cache_path(&home),
        ))
    }

    /// Parse and validate a TOML document already read by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or fails [`Config::validate`].
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Add a repository.
    pub fn with_repository(mut self, repo: RepositoryEntry) -> Self {
        self.repositories.push(repo);
        self
    }

    /// Check repository names are unique single path segments and URLs
    /// non-empty.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for repo in &self.repositories {
            if validate_segment("repository", &repo.name).is_err() {
                return Err(ConfigError::InvalidRepositoryName(repo.name.clone()));
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(ConfigError::DuplicateRepository(repo.name.clone()));
            }
            if repo.base_url().is_empty() {
                return Err(ConfigError::EmptyUrl(repo.name.clone()));
            }
        }
        Ok(())
    }

    /// Repositories ordered by (priority, name).
    pub fn sorted_repositories(&self) -> Vec<RepositoryEntry> {
        let mut repos = self.repositories.clone();
        repos.sort();
        repos
    }

    /// Look up a repository by name.
    pub fn repository(&self, name: &str) -> Option<&RepositoryEntry> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Metadata request timeout.
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    /// Archive transfer timeout.
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}
