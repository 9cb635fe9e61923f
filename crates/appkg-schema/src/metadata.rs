//! Metadata records: the per-archive `AppMetadata` and the repository-side
//! `PackageMetadataRecord`.
//!
//! Every field carries `#[serde(default)]` so that records missing newer
//! fields (or carrying extra ones) still load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Sha256Hash;

/// Whether an archive was built for development or production use.
///
/// Production archives additionally drop test files and VCS leftovers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    /// Development build: only the default/project ignore rules apply.
    Dev,
    /// Production build (default).
    #[default]
    Prod,
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Prod => write!(f, "prod"),
        }
    }
}

/// Metadata document stored at the root of every archive.
///
/// Produced once at build time; `content_checksum` is filled in by the
/// archive builder after staging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Owning organization.
    pub organization: String,
    /// App name; also the name of the module directory at archive root.
    pub app_name: String,
    /// Distribution name of the package.
    pub package_name: String,
    /// Version string of this build.
    pub package_version: String,
    /// Short human-readable summary.
    pub description: String,
    /// `dev` or `prod`.
    pub package_type: PackageType,
    /// Where the source lives (e.g. a git remote).
    pub source_control_url: String,
    /// Checksum over the packaged tree, excluding this document.
    pub content_checksum: Sha256Hash,
    /// Required apps, keyed by `org/app`, valued by version.
    pub dependencies: BTreeMap<String, String>,
    /// Hook scripts shipped with the package, relative to archive root.
    pub hooks: Vec<String>,
}

impl AppMetadata {
    /// Metadata with the identifying fields set and everything else defaulted.
    pub fn new(
        organization: impl Into<String>,
        app_name: impl Into<String>,
        package_version: impl Into<String>,
    ) -> Self {
        let app_name = app_name.into();
        Self {
            organization: organization.into(),
            package_name: app_name.clone(),
            app_name,
            package_version: package_version.into(),
            ..Self::default()
        }
    }

    /// Serialize as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not a JSON object of the expected shape.
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// One published version inside a [`PackageMetadataRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageVersionMetadata {
    /// Archive location relative to the repository root.
    pub archive_path: String,
    /// SHA256 of the archive bytes.
    pub checksum: Sha256Hash,
    /// RFC 3339 release timestamp.
    pub release_date: String,
    /// Dependencies declared by the archive's metadata.
    pub dependencies: BTreeMap<String, String>,
    /// Free-form release notes.
    pub notes: String,
}

/// Repository-side record for one `organization/app`, served as
/// `metadata/{org}/{app}/package-metadata.json`.
///
/// `latest_version` is expected to key into `versions`, but nothing
/// enforces it; see [`PackageMetadataRecord::latest_entry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageMetadataRecord {
    /// Owning organization.
    pub organization: String,
    /// App name.
    pub app_name: String,
    /// Short human-readable summary.
    pub description: String,
    /// Version the repository considers current.
    pub latest_version: String,
    /// Published versions keyed by version string.
    pub versions: BTreeMap<String, PackageVersionMetadata>,
}

impl PackageMetadataRecord {
    /// An empty record for a package that has never been published.
    pub fn new(organization: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            app_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Look up a specific version.
    pub fn version(&self, version: &str) -> Option<&PackageVersionMetadata> {
        self.versions.get(version)
    }

    /// The entry `latest_version` points at, if it exists.
    pub fn latest_entry(&self) -> Option<(&str, &PackageVersionMetadata)> {
        if self.latest_version.is_empty() {
            return None;
        }
        self.versions
            .get_key_value(&self.latest_version)
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not a JSON object of the expected shape.
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
