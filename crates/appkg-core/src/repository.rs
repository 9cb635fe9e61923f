//! HTTP repository client.
//!
//! A repository is a plain file server:
//!
//! ```text
//! GET/PUT {url}/metadata/{org}/{app}/package-metadata.json
//! GET/PUT {url}/{org}/{app}/{version}/{app}-{version}.tar.zst
//! ```
//!
//! There is no authentication and no retry. Metadata requests and archive
//! transfers use separate timeouts from [`Config`].

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use appkg_schema::{
    CoordinateError, PackageCoordinate, PackageMetadataRecord, PackageVersionMetadata,
    RepositoryEntry, Sha256Hash, VersionSpec, validate_segment,
};

use crate::USER_AGENT;
use crate::archive::{self, ArchiveError};
use crate::cache::ArchiveCache;
use crate::config::Config;
use crate::paths;
use crate::version::is_lexicographically_newer;

/// Length of the response body quoted in protocol errors.
const EXCERPT_LEN: usize = 200;

/// Errors raised while talking to repositories.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Every repository was tried and none could supply the package.
    #[error("Package {coordinate} not found in any repository (tried: {})", tried.join(", "))]
    NotFound {
        /// The requested `org/app@version`.
        coordinate: String,
        /// One `name (reason)` line per repository, in the order tried.
        tried: Vec<String>,
    },

    /// The repository answered with an unexpected status or content.
    #[error("Repository '{repo}' ({url}): {message}")]
    Protocol {
        /// Repository name.
        repo: String,
        /// Request URL.
        url: String,
        /// What was wrong with the answer.
        message: String,
    },

    /// The request never got an answer.
    #[error("Network error talking to repository '{repo}' ({url}): {source}")]
    Network {
        /// Repository name.
        repo: String,
        /// Request URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The response body broke off or could not be written to disk.
    #[error("Download from repository '{repo}' ({url}) failed: {source}")]
    Transfer {
        /// Repository name.
        repo: String,
        /// Request URL.
        url: String,
        /// Underlying read or write error.
        #[source]
        source: io::Error,
    },

    /// The version is already published.
    #[error("Version {version} of {org}/{app} already exists in repository '{repo}'")]
    Conflict {
        /// Organization.
        org: String,
        /// App name.
        app: String,
        /// The existing version.
        version: String,
        /// Repository name.
        repo: String,
    },

    /// Publishing needs an exact version.
    #[error("Cannot publish {0}: an exact version is required")]
    LatestNotPublishable(String),

    /// A caller-supplied organization, app, version or repository name is
    /// not a single path segment.
    #[error(transparent)]
    InvalidCoordinate(#[from] CoordinateError),

    /// The HTTP client could not be constructed.
    #[error("Failed to initialize HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Local filesystem failure in the cache or on the archive to publish.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The archive to publish could not be read.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> RepositoryError + '_ {
    move |source| RepositoryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn network(repo: &RepositoryEntry, url: &str) -> impl FnOnce(reqwest::Error) -> RepositoryError {
    let repo = repo.name.clone();
    let url = url.to_string();
    move |source| RepositoryError::Network { repo, url, source }
}

fn protocol(repo: &RepositoryEntry, url: &str, message: impl Into<String>) -> RepositoryError {
    RepositoryError::Protocol {
        repo: repo.name.clone(),
        url: url.to_string(),
        message: message.into(),
    }
}

/// First [`EXCERPT_LEN`] characters of an error body.
fn excerpt(response: Response) -> String {
    response
        .text()
        .unwrap_or_default()
        .chars()
        .take(EXCERPT_LEN)
        .collect()
}

fn expect_success(
    repo: &RepositoryEntry,
    url: &str,
    response: Response,
) -> Result<(), RepositoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(protocol(
        repo,
        url,
        format!("HTTP {status}: {}", excerpt(response)),
    ))
}

fn hash_file(path: &Path) -> io::Result<Sha256Hash> {
    let mut hasher = Sha256::new();
    let mut reader = BufReader::new(File::open(path)?);
    io::copy(&mut reader, &mut hasher)?;
    Ok(Sha256Hash::from_digest(hasher.finalize().as_slice()))
}

fn check_coordinate(org: &str, app: &str, version: Option<&str>) -> Result<(), CoordinateError> {
    validate_segment("organization", org)?;
    validate_segment("app_name", app)?;
    version.map_or(Ok(()), |v| validate_segment("version", v))
}

/// Join a repository-relative path onto the repository's base URL.
///
/// Anything that could point elsewhere (a scheme, `..`, a backslash) is
/// refused.
fn relative_url(repo: &RepositoryEntry, rel: &str) -> Result<String, String> {
    let rel = rel.strip_prefix('/').unwrap_or(rel);
    if rel.is_empty() || rel.contains("://") || rel.contains('\\') {
        return Err(format!("archive path '{rel}' is not repository-relative"));
    }
    if rel.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(format!("archive path '{rel}' is not repository-relative"));
    }
    Ok(format!("{}/{}", repo.base_url(), rel))
}

/// An archive sitting in the local cache, ready to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArchive {
    /// Repository the archive was resolved from.
    pub repository: String,
    /// Owning organization.
    pub organization: String,
    /// App name.
    pub app_name: String,
    /// Concrete version; `Latest` has been substituted.
    pub version: String,
    /// Verified archive file in the cache.
    pub path: PathBuf,
    /// The repository's entry for this version.
    pub entry: PackageVersionMetadata,
}

/// Blocking client for the repository protocol.
#[derive(Debug, Clone)]
pub struct RepositoryClient {
    http: Client,
    cache: ArchiveCache,
    metadata_timeout: Duration,
    transfer_timeout: Duration,
}

impl RepositoryClient {
    /// Build a client using the timeouts and cache root from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, RepositoryError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(RepositoryError::Client)?;
        Ok(Self {
            http,
            cache: ArchiveCache::new(&config.cache_base_path),
            metadata_timeout: config.metadata_timeout(),
            transfer_timeout: config.transfer_timeout(),
        })
    }

    /// The archive and metadata cache this client writes to.
    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    fn url(repo: &RepositoryEntry, rel: &str) -> String {
        format!("{}/{}", repo.base_url(), rel.trim_start_matches('/'))
    }

    /// Fetch the metadata record for `org/app`. A 404 means the repository
    /// has never seen the package and yields `Ok(None)`.
    ///
    /// Successful fetches are also written to the metadata cache.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidCoordinate`] if `org`, `app` or
    /// the repository name is not a single path segment,
    /// [`RepositoryError::Network`] on transport failure and
    /// [`RepositoryError::Protocol`] for other non-200 statuses or an
    /// unparseable body.
    pub fn fetch_metadata(
        &self,
        repo: &RepositoryEntry,
        org: &str,
        app: &str,
    ) -> Result<Option<PackageMetadataRecord>, RepositoryError> {
        validate_segment("repository", &repo.name)?;
        check_coordinate(org, app, None)?;
        let url = Self::url(repo, &paths::remote_metadata_path(org, app));
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .timeout(self.metadata_timeout)
            .send()
            .map_err(network(repo, &url))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                debug!("{}/{} not in repository '{}'", org, app, repo.name);
                return Ok(None);
            }
            status => {
                return Err(protocol(
                    repo,
                    &url,
                    format!("HTTP {status}: {}", excerpt(response)),
                ));
            }
        }

        let body = response.text().map_err(network(repo, &url))?;
        let record = PackageMetadataRecord::from_json(&body)
            .map_err(|e| protocol(repo, &url, format!("malformed package metadata: {e}")))?;

        if record.organization != org || record.app_name != app {
            warn!(
                "Record at {} names {}/{}, expected {}/{}",
                url, record.organization, record.app_name, org, app
            );
        }
        if let Err(e) = self.cache.store_metadata(&repo.name, org, app, &record) {
            warn!("Failed to cache metadata for {}/{}: {}", org, app, e);
        }

        Ok(Some(record))
    }

    /// Upload archive bytes to their conventional location.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Protocol`] with a body excerpt for any
    /// non-2xx response, [`RepositoryError::Network`] on transport failure.
    pub fn upload_archive(
        &self,
        repo: &RepositoryEntry,
        org: &str,
        app: &str,
        version: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RepositoryError> {
        check_coordinate(org, app, Some(version))?;
        let url = Self::url(repo, &paths::remote_archive_path(org, app, version));
        debug!("PUT {} ({} bytes)", url, bytes.len());

        let response = self
            .http
            .put(&url)
            .timeout(self.transfer_timeout)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .map_err(network(repo, &url))?;
        expect_success(repo, &url, response)
    }

    /// Replace the metadata record for `org/app`.
    ///
    /// # Errors
    ///
    /// See [`RepositoryClient::upload_archive`].
    pub fn publish_metadata(
        &self,
        repo: &RepositoryEntry,
        org: &str,
        app: &str,
        record: &PackageMetadataRecord,
    ) -> Result<(), RepositoryError> {
        check_coordinate(org, app, None)?;
        let url = Self::url(repo, &paths::remote_metadata_path(org, app));
        let json = record
            .to_json()
            .map_err(|e| protocol(repo, &url, format!("cannot encode metadata: {e}")))?;
        debug!("PUT {}", url);

        let response = self
            .http
            .put(&url)
            .timeout(self.metadata_timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(json)
            .send()
            .map_err(network(repo, &url))?;
        expect_success(repo, &url, response)
    }

    /// Publish an archive as `coordinate` and record it in the package's
    /// metadata. Published versions are immutable.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::LatestNotPublishable`] for a `latest`
    /// coordinate, [`RepositoryError::Conflict`] if the version already
    /// exists (nothing is uploaded), and archive, I/O or HTTP errors
    /// otherwise.
    pub fn publish(
        &self,
        repo: &RepositoryEntry,
        coordinate: &PackageCoordinate,
        archive_path: &Path,
    ) -> Result<PackageMetadataRecord, RepositoryError> {
        let Some(version) = coordinate.version().as_exact() else {
            return Err(RepositoryError::LatestNotPublishable(coordinate.to_string()));
        };
        let org = coordinate.organization();
        let app = coordinate.app_name();

        let bytes = fs::read(archive_path).map_err(io_at(archive_path))?;
        let meta = archive::read_metadata(&bytes)?;
        if meta.organization != org || meta.app_name != app || meta.package_version != version {
            warn!(
                "Archive {} describes {}/{}@{} but is being published as {}",
                archive_path.display(),
                meta.organization,
                meta.app_name,
                meta.package_version,
                coordinate
            );
        }

        let mut record = match self.fetch_metadata(repo, org, app)? {
            Some(record) => record,
            None => {
                info!("First publish of {}/{} to '{}'", org, app, repo.name);
                PackageMetadataRecord::new(org, app)
            }
        };
        if record.versions.contains_key(version) {
            return Err(RepositoryError::Conflict {
                org: org.to_string(),
                app: app.to_string(),
                version: version.to_string(),
                repo: repo.name.clone(),
            });
        }
        if record.description.is_empty() {
            record.description.clone_from(&meta.description);
        }

        let checksum = Sha256Hash::compute(&bytes);
        let size = bytes.len();
        self.upload_archive(repo, org, app, version, bytes)?;

        record.versions.insert(
            version.to_string(),
            PackageVersionMetadata {
                archive_path: paths::remote_archive_path(org, app, version),
                checksum,
                release_date: chrono::Utc::now().to_rfc3339(),
                dependencies: meta.dependencies.clone(),
                notes: String::new(),
            },
        );
        if is_lexicographically_newer(version, &record.latest_version) {
            record.latest_version = version.to_string();
        }
        self.publish_metadata(repo, org, app, &record)?;

        if let Err(e) = self.cache.store_metadata(&repo.name, org, app, &record) {
            warn!("Failed to cache metadata for {}/{}: {}", org, app, e);
        }
        info!(
            "Published {}/{}@{} to '{}' ({} bytes)",
            org, app, version, repo.name, size
        );
        Ok(record)
    }

    /// Find `org/app` at `spec` in the first repository that has it,
    /// downloading the archive into the cache unless a verified copy is
    /// already there. `repos` is tried in the order given.
    ///
    /// A repository that lacks the package, or fails, is logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidCoordinate`] before any request if
    /// the coordinate is not made of single path segments, and
    /// [`RepositoryError::NotFound`] listing every repository tried and
    /// why it was passed over.
    pub fn resolve_and_cache(
        &self,
        org: &str,
        app: &str,
        spec: &VersionSpec,
        repos: &[RepositoryEntry],
    ) -> Result<CachedArchive, RepositoryError> {
        check_coordinate(org, app, spec.as_exact())?;
        let mut tried = Vec::with_capacity(repos.len());
        for repo in repos {
            match self.try_repository(repo, org, app, spec) {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => tried.push(format!("{} (not found)", repo.name)),
                Err(e) => {
                    warn!("Skipping repository '{}' for {}/{}: {}", repo.name, org, app, e);
                    tried.push(format!("{} ({e})", repo.name));
                }
            }
        }
        Err(RepositoryError::NotFound {
            coordinate: format!("{org}/{app}@{spec}"),
            tried,
        })
    }

    fn try_repository(
        &self,
        repo: &RepositoryEntry,
        org: &str,
        app: &str,
        spec: &VersionSpec,
    ) -> Result<Option<CachedArchive>, RepositoryError> {
        let Some(record) = self.fetch_metadata(repo, org, app)? else {
            return Ok(None);
        };

        let record_url = || Self::url(repo, &paths::remote_metadata_path(org, app));
        let version = match spec {
            VersionSpec::Exact(v) => v.clone(),
            VersionSpec::Latest => {
                if record.latest_version.is_empty() {
                    return Err(protocol(repo, &record_url(), "record has no latest_version"));
                }
                record.latest_version.clone()
            }
        };
        let Some(entry) = record.version(&version) else {
            debug!("{}/{}@{} not listed by '{}'", org, app, version, repo.name);
            return Ok(None);
        };

        if let Err(e) = validate_segment("version", &version) {
            return Err(protocol(repo, &record_url(), e.to_string()));
        }
        let expected = if entry.checksum.is_empty() {
            Sha256Hash::default()
        } else {
            Sha256Hash::validated(entry.checksum.as_str())
                .map_err(|e| protocol(repo, &record_url(), format!("malformed checksum: {e}")))?
        };
        let archive_url = if entry.archive_path.is_empty() {
            Self::url(repo, &paths::remote_archive_path(org, app, &version))
        } else {
            relative_url(repo, &entry.archive_path)
                .map_err(|message| protocol(repo, &record_url(), message))?
        };

        let dest = self.cache.archive_path(&repo.name, org, app, &version);
        if !self.reuse_cached(&dest, &expected)? {
            self.download(repo, &archive_url, &dest, &expected)?;
        }

        Ok(Some(CachedArchive {
            repository: repo.name.clone(),
            organization: org.to_string(),
            app_name: app.to_string(),
            version,
            path: dest,
            entry: entry.clone(),
        }))
    }

    /// Whether a cached archive can be used as-is. A copy whose hash does
    /// not match is deleted.
    fn reuse_cached(&self, path: &Path, expected: &Sha256Hash) -> Result<bool, RepositoryError> {
        match fs::metadata(path) {
            Ok(m) if m.len() > 0 => {}
            _ => return Ok(false),
        }
        if expected.is_empty() {
            warn!("No checksum declared for {}; using cached copy unverified", path.display());
            return Ok(true);
        }

        let actual = hash_file(path).map_err(io_at(path))?;
        if actual.matches(expected) {
            debug!("Cache hit: {}", path.display());
            return Ok(true);
        }
        warn!(
            "Cached {} has checksum {}, expected {}; re-downloading",
            path.display(),
            actual,
            expected
        );
        fs::remove_file(path).map_err(io_at(path))?;
        Ok(false)
    }

    /// Stream `url` into `dest` through a `.part` file, hashing as it goes.
    fn download(
        &self,
        repo: &RepositoryEntry,
        url: &str,
        dest: &Path,
        expected: &Sha256Hash,
    ) -> Result<(), RepositoryError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        let mut part_name = dest.as_os_str().to_owned();
        part_name.push(".part");
        let part = PathBuf::from(part_name);

        debug!("GET {}", url);
        let mut response = self
            .http
            .get(url)
            .timeout(self.transfer_timeout)
            .send()
            .map_err(network(repo, url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(protocol(
                repo,
                url,
                format!("HTTP {status}: {}", excerpt(response)),
            ));
        }

        let result = stream_to_file(&mut response, &part);
        let (actual, size) = match result {
            Ok(done) => done,
            Err(e) => {
                fs::remove_file(&part).ok();
                return Err(RepositoryError::Transfer {
                    repo: repo.name.clone(),
                    url: url.to_string(),
                    source: e,
                });
            }
        };

        if expected.is_empty() {
            warn!("No checksum declared for {}; skipping verification", url);
        } else if !actual.matches(expected) {
            fs::remove_file(&part).ok();
            return Err(protocol(
                repo,
                url,
                format!("checksum mismatch: expected {expected}, got {actual}"),
            ));
        }

        fs::rename(&part, dest).map_err(io_at(dest))?;
        info!("Downloaded {} ({} bytes)", dest.display(), size);
        Ok(())
    }
}

fn stream_to_file(reader: &mut impl Read, path: &Path) -> io::Result<(Sha256Hash, u64)> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    writer.flush()?;
    Ok((Sha256Hash::from_digest(hasher.finalize().as_slice()), total))
}
