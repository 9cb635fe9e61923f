//! Default on-disk locations and the layout of the store and cache trees.

use dirs::home_dir;
use std::path::{Path, PathBuf};

use appkg_schema::{PACKAGE_METADATA_FILE_NAME, archive_file_name};

/// Returns the appkg home directory, or None if the user's home cannot be resolved.
///
/// `APPKG_HOME` overrides the default `~/.appkg`.
pub fn try_appkg_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("APPKG_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".appkg"))
}

/// Default local store root: `<home>/apps`
pub fn default_apps_path(home: &Path) -> PathBuf {
    home.join("apps")
}

/// Default cache root: `<home>/cache`
pub fn default_cache_path(home: &Path) -> PathBuf {
    home.join("cache")
}

/// Store directory of one installed version: `<apps>/<org>/<app>/<version>`
pub fn store_version_dir(apps_base: &Path, org: &str, app: &str, version: &str) -> PathBuf {
    apps_base.join(org).join(app).join(version)
}

/// Cached archive: `<cache>/<repo>/<org>/<app>/<version>/<app>-<version>.tar.zst`
pub fn cached_archive_path(
    cache_base: &Path,
    repo: &str,
    org: &str,
    app: &str,
    version: &str,
) -> PathBuf {
    cache_base
        .join(repo)
        .join(org)
        .join(app)
        .join(version)
        .join(archive_file_name(app, version))
}

/// Cached record: `<cache>/<repo>/metadata/<org>/<app>/package-metadata.json`
pub fn cached_metadata_path(cache_base: &Path, repo: &str, org: &str, app: &str) -> PathBuf {
    cache_base
        .join(repo)
        .join("metadata")
        .join(org)
        .join(app)
        .join(PACKAGE_METADATA_FILE_NAME)
}

/// Repository-relative archive path: `{org}/{app}/{version}/{app}-{version}.tar.zst`
pub fn remote_archive_path(org: &str, app: &str, version: &str) -> String {
    format!("{org}/{app}/{version}/{}", archive_file_name(app, version))
}

/// Repository-relative record path: `metadata/{org}/{app}/package-metadata.json`
pub fn remote_metadata_path(org: &str, app: &str) -> String {
    format!("metadata/{org}/{app}/{PACKAGE_METADATA_FILE_NAME}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_layout() {
        let base = Path::new("/c");
        assert_eq!(
            cached_archive_path(base, "main", "acme", "widgets", "2.0.0"),
            PathBuf::from("/c/main/acme/widgets/2.0.0/widgets-2.0.0.tar.zst")
        );
        assert_eq!(
            cached_metadata_path(base, "main", "acme", "widgets"),
            PathBuf::from("/c/main/metadata/acme/widgets/package-metadata.json")
        );
    }

    #[test]
    fn remote_layout() {
        assert_eq!(
            remote_archive_path("acme", "widgets", "2.0.0"),
            "acme/widgets/2.0.0/widgets-2.0.0.tar.zst"
        );
        assert_eq!(
            remote_metadata_path("acme", "widgets"),
            "metadata/acme/widgets/package-metadata.json"
        );
    }
}
