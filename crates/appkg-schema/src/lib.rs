//! Shared types and wire format for appkg.
//!
//! Everything in this crate is plain data: coordinates naming a package,
//! the metadata record embedded in every archive, and the records a
//! repository serves per `organization/app`. Behavior beyond
//! (de)serialization lives in `appkg-core`.

pub mod coordinate;
pub mod hash;
pub mod metadata;
pub mod repository;
pub mod search;

// Re-exports
pub use coordinate::{CoordinateError, PackageCoordinate, VersionSpec, validate_segment};
pub use hash::Sha256Hash;
pub use metadata::{AppMetadata, PackageMetadataRecord, PackageType, PackageVersionMetadata};
pub use repository::RepositoryEntry;
pub use search::{SearchResultItem, SearchSource};

/// Name of the metadata document stored at the root of every archive.
pub const METADATA_FILE_NAME: &str = "app_metadata.json";

/// File extension of package archives (zstd-compressed tar).
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

/// File name of the repository-side metadata record for one `org/app`.
pub const PACKAGE_METADATA_FILE_NAME: &str = "package-metadata.json";

/// Canonical archive file name for an app version: `{app}-{version}.tar.zst`.
pub fn archive_file_name(app_name: &str, version: &str) -> String {
    format!("{app_name}-{version}.{ARCHIVE_EXTENSION}")
}
