//! Resolution engine: coordinate -> installed app module.
//!
//! Resolution proceeds through three steps and stops at the first that
//! yields a complete install:
//!
//! 1. exact version already complete in the local store (no network)
//! 2. for `latest`, the lexicographically greatest local version, if complete
//! 3. the configured repositories in priority order, installing the result

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use appkg_schema::{PackageCoordinate, PackageMetadataRecord, SearchResultItem, VersionSpec};

use crate::config::{Config, ConfigError};
use crate::error::Error;
use crate::repository::RepositoryClient;
use crate::search::{self, SearchQuery};
use crate::store::{InstalledPackage, LocalStore};

/// Where a resolved package came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOrigin {
    /// Already installed; nothing was fetched.
    LocalStore,
    /// Fetched from (or through the cache of) the named repository.
    Repository(String),
}

/// A coordinate resolved to a complete install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    /// The complete install in the local store.
    pub installed: InstalledPackage,
    /// Which source satisfied the request.
    pub origin: ResolutionOrigin,
}

impl ResolvedPackage {
    /// `<apps>/<org>/<app>/<version>/<app>`
    pub fn app_module_path(&self) -> &Path {
        &self.installed.app_module_path
    }

    /// The concrete installed version.
    pub fn version(&self) -> &str {
        &self.installed.version
    }
}

/// Ties the store, repository client and cache together for one
/// invocation's [`Config`].
#[derive(Debug)]
pub struct Resolver {
    config: Config,
    store: LocalStore,
    client: RepositoryClient,
}

impl Resolver {
    /// Validate `config` and set up the store and repository client.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let client = RepositoryClient::new(&config)?;
        Ok(Self {
            store: LocalStore::new(&config.apps_base_path),
            client,
            config,
        })
    }

    /// The configuration this resolver was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The local store installs land in.
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// The repository client, and through it the cache.
    pub fn client(&self) -> &RepositoryClient {
        &self.client
    }

    /// Resolve `coordinate` to an installed app module, fetching and
    /// installing it if the local store cannot satisfy it.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::ErrorKind::NotFound`] error naming every
    /// repository tried if no source has the package, or the store,
    /// archive or network error that stopped the install.
    pub fn resolve(&self, coordinate: &PackageCoordinate) -> Result<ResolvedPackage, Error> {
        let org = coordinate.organization();
        let app = coordinate.app_name();

        let local = match coordinate.version() {
            VersionSpec::Exact(version) => self.local_exact(org, app, version),
            VersionSpec::Latest => match self.store.resolve_lexicographically_latest(org, app)? {
                Some(version) => {
                    let found = self.local_exact(org, app, &version);
                    if found.is_none() {
                        debug!(
                            "Latest local {}/{}@{} is incomplete; trying repositories",
                            org, app, version
                        );
                    }
                    found
                }
                None => None,
            },
        };
        if let Some(installed) = local {
            debug!("Resolved {} from the local store", coordinate);
            return Ok(ResolvedPackage {
                installed,
                origin: ResolutionOrigin::LocalStore,
            });
        }

        self.remote_fallback(coordinate)
    }

    fn local_exact(&self, org: &str, app: &str, version: &str) -> Option<InstalledPackage> {
        self.store.installed(org, app, version)
    }

    fn remote_fallback(&self, coordinate: &PackageCoordinate) -> Result<ResolvedPackage, Error> {
        let repos = self.config.sorted_repositories();
        let cached = self.client.resolve_and_cache(
            coordinate.organization(),
            coordinate.app_name(),
            coordinate.version(),
            &repos,
        )?;

        let installed = self.store.install(&cached.path)?;
        if installed.organization != cached.organization
            || installed.app_name != cached.app_name
            || installed.version != cached.version
        {
            warn!(
                "Archive for {}/{}@{} from '{}' describes {}/{}@{}",
                cached.organization,
                cached.app_name,
                cached.version,
                cached.repository,
                installed.organization,
                installed.app_name,
                installed.version
            );
        }
        info!(
            "Resolved {} to {} via '{}'",
            coordinate,
            installed.version,
            cached.repository
        );
        Ok(ResolvedPackage {
            installed,
            origin: ResolutionOrigin::Repository(cached.repository),
        })
    }

    /// Publish an archive file to the named repository.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownRepository`] if no repository has that
    /// name, otherwise see [`RepositoryClient::publish`].
    pub fn publish(
        &self,
        coordinate: &PackageCoordinate,
        archive_path: &Path,
        repository: &str,
    ) -> Result<PackageMetadataRecord, Error> {
        let repo = self
            .config
            .repository(repository)
            .ok_or_else(|| ConfigError::UnknownRepository(repository.to_string()))?;
        Ok(self.client.publish(repo, coordinate, archive_path)?)
    }

    /// Merged, deduplicated search over the local store, live repositories
    /// and the metadata cache. Sources that fail are skipped.
    pub fn search(&self, query: &SearchQuery) -> Vec<SearchResultItem> {
        let repos = self.config.sorted_repositories();
        let mut items = search::local_results(&self.store, query);
        items.extend(search::remote_results(&self.client, &repos, query));
        items.extend(search::cache_results(self.client.cache(), query));
        search::merge_results(items)
    }

    /// Where `coordinate` would be installed, without touching the network.
    /// `None` for `latest` coordinates.
    pub fn store_path(&self, coordinate: &PackageCoordinate) -> Option<PathBuf> {
        let version = coordinate.version().as_exact()?;
        Some(self.store.app_module_path(
            coordinate.organization(),
            coordinate.app_name(),
            version,
        ))
    }
}
