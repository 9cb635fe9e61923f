//! On-disk cache of downloaded archives and fetched metadata records.
//!
//! ```text
//! <cache>/<repo>/<org>/<app>/<version>/<app>-<version>.tar.zst
//! <cache>/<repo>/metadata/<org>/<app>/package-metadata.json
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::{debug, warn};

use appkg_schema::{PACKAGE_METADATA_FILE_NAME, PackageMetadataRecord};

use crate::paths;

/// A metadata record found in the cache, with the repository it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRecord {
    /// Name of the repository directory the record was found under.
    pub repository: String,
    /// The record as last fetched or published.
    pub record: PackageMetadataRecord,
}

/// Repository-partitioned cache rooted at `cache_base_path`.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    root: PathBuf,
}

impl ArchiveCache {
    /// A cache rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache base path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<cache>/<repo>/<org>/<app>/<version>/<app>-<version>.tar.zst`
    pub fn archive_path(&self, repo: &str, org: &str, app: &str, version: &str) -> PathBuf {
        paths::cached_archive_path(&self.root, repo, org, app, version)
    }

    /// `<cache>/<repo>/metadata/<org>/<app>/package-metadata.json`
    pub fn metadata_path(&self, repo: &str, org: &str, app: &str) -> PathBuf {
        paths::cached_metadata_path(&self.root, repo, org, app)
    }

    /// Write a fetched record so later searches can see it offline.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn store_metadata(
        &self,
        repo: &str,
        org: &str,
        app: &str,
        record: &PackageMetadataRecord,
    ) -> io::Result<()> {
        let path = self.metadata_path(repo, org, app);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = record.to_json().map_err(io::Error::other)?;
        fs::write(&path, json)?;
        debug!("Cached metadata at {}", path.display());
        Ok(())
    }

    /// The cached record for one package, if present and parseable.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read.
    pub fn load_metadata(
        &self,
        repo: &str,
        org: &str,
        app: &str,
    ) -> io::Result<Option<PackageMetadataRecord>> {
        read_record(&self.metadata_path(repo, org, app))
    }

    /// Every cached record across all repositories. Unparseable files are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the cache tree cannot be listed.
    pub fn cached_records(&self) -> io::Result<Vec<CachedRecord>> {
        let pattern = format!(
            "{}/*/metadata/*/*/{PACKAGE_METADATA_FILE_NAME}",
            Pattern::escape(&self.root.to_string_lossy())
        );
        let paths = glob::glob(&pattern).map_err(io::Error::other)?;

        let mut records = Vec::new();
        for path in paths {
            let path = path.map_err(glob::GlobError::into_error)?;
            let Some(repository) = self.repository_of(&path) else {
                continue;
            };
            if let Some(record) = read_record(&path)? {
                records.push(CachedRecord { repository, record });
            }
        }
        Ok(records)
    }

    /// `<root>/<repo>/metadata/...` -> `repo`
    fn repository_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let first = rel.components().next()?;
        Some(first.as_os_str().to_string_lossy().into_owned())
    }
}

fn read_record(path: &Path) -> io::Result<Option<PackageMetadataRecord>> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    match PackageMetadataRecord::from_json(&json) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!("Ignoring unreadable cached metadata {}: {}", path.display(), e);
            Ok(None)
        }
    }
}
