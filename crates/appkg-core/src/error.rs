//! Crate-level error and its coarse classification.

use thiserror::Error;

use appkg_schema::CoordinateError;

use crate::archive::ArchiveError;
use crate::config::ConfigError;
use crate::repository::RepositoryError;
use crate::store::StoreError;

/// Any failure surfaced by [`crate::Resolver`].
#[derive(Error, Debug)]
pub enum Error {
    /// Building, reading or extracting an archive failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// A repository request or the fallback chain failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The local store could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A coordinate failed validation.
    #[error(transparent)]
    Coordinate(#[from] CoordinateError),
}

/// What went wrong, independent of which module noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No repository had the requested package or version.
    NotFound,
    /// A repository answered with an unexpected status or body.
    Protocol,
    /// Transport failure or timeout.
    Network,
    /// Unreadable, malformed or tampered archive.
    Archive,
    /// The caller asked for something invalid.
    Precondition,
    /// Publishing a version that already exists.
    Conflict,
    /// Local filesystem failure.
    Store,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Archive(e) => e.kind(),
            Self::Repository(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Config(_) | Self::Coordinate(_) => ErrorKind::Precondition,
        }
    }
}

impl ArchiveError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition(_) | Self::SourceMissing(_) => ErrorKind::Precondition,
            Self::Io(_) => ErrorKind::Store,
            Self::Corrupt(_)
            | Self::MissingMetadata
            | Self::MalformedMetadata(_)
            | Self::PathTraversal(_)
            | Self::ChecksumMismatch { .. } => ErrorKind::Archive,
        }
    }
}

impl RepositoryError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Network { .. } | Self::Transfer { .. } | Self::Client(_) => ErrorKind::Network,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::LatestNotPublishable(_) | Self::InvalidCoordinate(_) => ErrorKind::Precondition,
            Self::Io { .. } => ErrorKind::Store,
            Self::Archive(e) => e.kind(),
        }
    }
}

impl StoreError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Store,
            Self::IncompleteMetadata { .. } | Self::Coordinate(_) => ErrorKind::Precondition,
            Self::InvalidMetadata { .. } => ErrorKind::Archive,
            Self::Archive(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn nested_errors_keep_their_kind() {
        let err: Error = StoreError::Archive(ArchiveError::PathTraversal("../x".into())).into();
        assert_eq!(err.kind(), ErrorKind::Archive);

        let err: Error = RepositoryError::Conflict {
            org: "acme".into(),
            app: "widgets".into(),
            version: "1.0.0".into(),
            repo: "main".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: Error = StoreError::Io {
            path: PathBuf::from("/apps"),
            source: io::Error::other("disk full"),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Store);
    }

    #[test]
    fn invalid_input_is_precondition() {
        let err: Error = CoordinateError::EmptyField("organization").into();
        assert_eq!(err.kind(), ErrorKind::Precondition);

        let err: Error = ArchiveError::Precondition("package_name must not be empty".into()).into();
        assert_eq!(err.kind(), ErrorKind::Precondition);

        let err: Error = CoordinateError::InvalidSegment {
            field: "version",
            value: "..".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn unsafe_archive_metadata_is_archive_error() {
        let err: Error = StoreError::InvalidMetadata {
            archive: PathBuf::from("crafted.tar.zst"),
            source: CoordinateError::InvalidSegment {
                field: "package_version",
                value: "../x".into(),
            },
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Archive);
    }
}
