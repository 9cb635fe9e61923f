//! Local package store.
//!
//! Layout: `<apps>/<org>/<app>/<version>/` holds the extracted archive
//! (module directory `<app>/`, any other root files and `app_metadata.json`),
//! the original archive as `original-<app>-<version>.tar.zst` and a
//! `.appkg-complete` marker. The marker is written last, so a version
//! directory without it is a partial install.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use appkg_schema::{
    AppMetadata, CoordinateError, METADATA_FILE_NAME, archive_file_name, validate_segment,
};

use crate::archive::{self, ArchiveError};
use crate::paths;
use crate::version::resolve_lexicographically_latest;

/// Marker file written once an install has fully landed.
pub const COMPLETE_MARKER: &str = ".appkg-complete";

/// Prefix of the archive copy kept next to an installed version.
const RETAINED_ARCHIVE_PREFIX: &str = "original-";

/// Errors raised by [`LocalStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure under the store root.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The archive's metadata leaves a coordinate field empty.
    #[error("Archive {archive} has incomplete metadata: {field} is empty")]
    IncompleteMetadata {
        /// Archive being installed.
        archive: PathBuf,
        /// The empty field.
        field: &'static str,
    },

    /// The archive's metadata names a coordinate that is not a safe path
    /// segment.
    #[error("Archive {archive} has invalid metadata: {source}")]
    InvalidMetadata {
        /// Archive being installed.
        archive: PathBuf,
        /// What was wrong with the coordinate.
        #[source]
        source: CoordinateError,
    },

    /// A caller-supplied coordinate is not a safe path segment.
    #[error(transparent)]
    Coordinate(#[from] CoordinateError),

    /// Reading, extracting or verifying the archive failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File name of the retained archive copy.
pub fn retained_archive_name(app: &str, version: &str) -> String {
    format!("{RETAINED_ARCHIVE_PREFIX}{}", archive_file_name(app, version))
}

/// Where an installed version landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Owning organization.
    pub organization: String,
    /// App name.
    pub app_name: String,
    /// Installed version.
    pub version: String,
    /// `<apps>/<org>/<app>/<version>`
    pub store_root: PathBuf,
    /// `<store_root>/<app>`
    pub app_module_path: PathBuf,
}

/// A complete version found by [`LocalStore::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// Owning organization.
    pub organization: String,
    /// App name.
    pub app_name: String,
    /// Version directory name.
    pub version: String,
    /// `None` if the stored metadata file is missing or unreadable.
    pub metadata: Option<AppMetadata>,
}

/// The versioned on-disk store rooted at `apps_base_path`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// A store rooted at `root`. Nothing is created until the first install.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The apps base path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<apps>/<org>/<app>/<version>`
    pub fn version_dir(&self, org: &str, app: &str, version: &str) -> PathBuf {
        paths::store_version_dir(&self.root, org, app, version)
    }

    /// `<apps>/<org>/<app>/<version>/<app>`
    pub fn app_module_path(&self, org: &str, app: &str, version: &str) -> PathBuf {
        self.version_dir(org, app, version).join(app)
    }

    /// A version is usable once its module directory exists and the
    /// completeness marker is present.
    pub fn is_complete(&self, org: &str, app: &str, version: &str) -> bool {
        let dir = self.version_dir(org, app, version);
        dir.join(app).is_dir() && dir.join(COMPLETE_MARKER).is_file()
    }

    /// The install record for a complete version, if there is one.
    pub fn installed(&self, org: &str, app: &str, version: &str) -> Option<InstalledPackage> {
        if !self.is_complete(org, app, version) {
            return None;
        }
        let store_root = self.version_dir(org, app, version);
        Some(InstalledPackage {
            organization: org.to_string(),
            app_name: app.to_string(),
            version: version.to_string(),
            app_module_path: store_root.join(app),
            store_root,
        })
    }

    /// Version directories under `<apps>/<org>/<app>`, complete or not,
    /// sorted. A missing app directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the app directory cannot be read.
    pub fn list_versions(&self, org: &str, app: &str) -> Result<Vec<String>, StoreError> {
        let app_dir = self.root.join(org).join(app);
        let mut versions = subdirectories(&app_dir)?;
        versions.sort();
        Ok(versions)
    }

    /// The lexicographically greatest installed version directory.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::list_versions`].
    pub fn resolve_lexicographically_latest(
        &self,
        org: &str,
        app: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(resolve_lexicographically_latest(self.list_versions(org, app)?))
    }

    /// Install an archive file, replacing any existing copy of the same
    /// version.
    ///
    /// The metadata is read before anything is written, so a corrupt or
    /// incomplete archive leaves the store untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IncompleteMetadata`] if organization, app name
    /// or version is empty, [`StoreError::InvalidMetadata`] if one of them
    /// is not a single path segment, [`StoreError::Archive`] for unreadable archives,
    /// path traversal or a content checksum mismatch, and
    /// [`StoreError::Io`] for filesystem failures.
    pub fn install(&self, archive_path: &Path) -> Result<InstalledPackage, StoreError> {
        let meta = archive::read_metadata_file(archive_path)?;
        for (field, value) in [
            ("organization", &meta.organization),
            ("app_name", &meta.app_name),
            ("package_version", &meta.package_version),
        ] {
            match validate_segment(field, value) {
                Ok(()) => {}
                Err(CoordinateError::EmptyField(field)) => {
                    return Err(StoreError::IncompleteMetadata {
                        archive: archive_path.to_path_buf(),
                        field,
                    });
                }
                Err(source) => {
                    return Err(StoreError::InvalidMetadata {
                        archive: archive_path.to_path_buf(),
                        source,
                    });
                }
            }
        }

        let org = meta.organization.as_str();
        let app = meta.app_name.as_str();
        let version = meta.package_version.as_str();
        let store_root = self.version_dir(org, app, version);

        if store_root.exists() {
            debug!("Replacing existing install at {}", store_root.display());
            fs::remove_dir_all(&store_root).map_err(io_at(&store_root))?;
        }
        fs::create_dir_all(&store_root).map_err(io_at(&store_root))?;

        archive::extract_archive_file(archive_path, &store_root)?;

        if meta.content_checksum.is_empty() {
            warn!(
                "{}/{}@{} declares no content checksum; skipping verification",
                org, app, version
            );
        } else {
            archive::verify_content_checksum(&store_root, &meta.content_checksum)?;
        }

        let retained = store_root.join(retained_archive_name(app, version));
        fs::copy(archive_path, &retained).map_err(io_at(&retained))?;

        let marker = store_root.join(COMPLETE_MARKER);
        fs::write(&marker, meta.content_checksum.as_str()).map_err(io_at(&marker))?;

        info!("Installed {}/{}@{} to {}", org, app, version, store_root.display());

        Ok(InstalledPackage {
            organization: org.to_string(),
            app_name: app.to_string(),
            version: version.to_string(),
            app_module_path: store_root.join(app),
            store_root,
        })
    }

    /// Every complete installed version, with its stored metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if a store directory cannot be read.
    pub fn entries(&self) -> Result<Vec<StoreEntry>, StoreError> {
        let mut entries = Vec::new();
        for org in subdirectories(&self.root)? {
            for app in subdirectories(&self.root.join(&org))? {
                for version in self.list_versions(&org, &app)? {
                    if !self.is_complete(&org, &app, &version) {
                        debug!("Skipping partial install {}/{}@{}", org, app, version);
                        continue;
                    }
                    let metadata = self.read_stored_metadata(&org, &app, &version);
                    entries.push(StoreEntry {
                        organization: org.clone(),
                        app_name: app.clone(),
                        version,
                        metadata,
                    });
                }
            }
        }
        Ok(entries)
    }

    fn read_stored_metadata(&self, org: &str, app: &str, version: &str) -> Option<AppMetadata> {
        let path = self.version_dir(org, app, version).join(METADATA_FILE_NAME);
        let json = fs::read_to_string(&path).ok()?;
        match AppMetadata::from_json(&json) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("Unreadable metadata at {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Delete an installed version. Returns `false` if it was not present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Coordinate`] if any argument is not a single
    /// path segment and [`StoreError::Io`] if the directory cannot be
    /// removed.
    pub fn remove(&self, org: &str, app: &str, version: &str) -> Result<bool, StoreError> {
        validate_segment("organization", org)?;
        validate_segment("app_name", app)?;
        validate_segment("version", version)?;
        let dir = self.version_dir(org, app, version);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).map_err(io_at(&dir))?;
        info!("Removed {}/{}@{}", org, app, version);
        Ok(true)
    }
}

/// Names of the directories directly under `dir`; empty if `dir` is absent.
fn subdirectories(dir: &Path) -> Result<Vec<String>, StoreError> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_at(dir)(e)),
    };

    let mut names = Vec::new();
    for entry in read {
        let entry = entry.map_err(io_at(dir))?;
        if entry.file_type().map_err(io_at(dir))?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
