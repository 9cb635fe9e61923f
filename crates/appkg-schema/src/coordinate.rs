//! Package coordinates: `organization/app@version`.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Errors raised while constructing or parsing a [`PackageCoordinate`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinateError {
    /// A required component (organization, app name or version) is empty.
    #[error("Empty field: {0}")]
    EmptyField(&'static str),

    /// The input does not follow `org/app[@version]`.
    #[error("Invalid coordinate format: expected 'org/app[@version]', got '{0}'")]
    InvalidFormat(String),

    /// A component is not a single plain path segment (`..`, `a/b`).
    #[error("Invalid {field} '{value}': must be a single path segment")]
    InvalidSegment {
        /// Which component was rejected.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Check that `value` can name one directory level of the store or cache.
///
/// Organizations, app names and versions are joined into filesystem paths,
/// so each must be exactly one normal component: non-empty, no separators,
/// not `.` or `..`, no NUL.
///
/// # Errors
///
/// Returns [`CoordinateError::EmptyField`] for blank input and
/// [`CoordinateError::InvalidSegment`] for anything else that fails.
///
/// ```
/// use appkg_schema::coordinate::validate_segment;
///
/// assert!(validate_segment("version", "1.2.3").is_ok());
/// assert!(validate_segment("version", "../1.2.3").is_err());
/// ```
pub fn validate_segment(field: &'static str, value: &str) -> Result<(), CoordinateError> {
    if value.trim().is_empty() {
        return Err(CoordinateError::EmptyField(field));
    }
    let invalid = || CoordinateError::InvalidSegment {
        field,
        value: value.to_string(),
    };
    if value.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Which version of a package a caller asks for.
///
/// `Latest` is resolved against whatever a source considers current: the
/// lexicographically greatest version in the local store, or the
/// `latest_version` field of a repository record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSpec {
    /// One specific version string.
    Exact(String),
    /// Whatever the source reports as the newest version.
    Latest,
}

impl VersionSpec {
    /// Return the exact version string, or `None` for [`VersionSpec::Latest`].
    pub fn as_exact(&self) -> Option<&str> {
        match self {
            Self::Exact(v) => Some(v),
            Self::Latest => None,
        }
    }

    /// Returns `true` for [`VersionSpec::Latest`].
    pub fn is_latest(&self) -> bool {
        matches!(self, Self::Latest)
    }
}

impl std::fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Latest => write!(f, "latest"),
        }
    }
}

/// The `(organization, app_name, version)` triple identifying a package.
///
/// # Example
///
/// ```
/// use appkg_schema::{PackageCoordinate, VersionSpec};
///
/// let coord = PackageCoordinate::parse("acme/widgets@2.0.0").unwrap();
/// assert_eq!(coord.organization(), "acme");
/// assert_eq!(coord.app_name(), "widgets");
/// assert_eq!(coord.version(), &VersionSpec::Exact("2.0.0".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct PackageCoordinate {
    organization: String,
    app_name: String,
    version: VersionSpec,
}

#[derive(Deserialize)]
struct RawCoordinate {
    organization: String,
    app_name: String,
    version: VersionSpec,
}

impl TryFrom<RawCoordinate> for PackageCoordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.organization, raw.app_name, raw.version)
    }
}

impl PackageCoordinate {
    /// Create a coordinate, validating every identifier with
    /// [`validate_segment`].
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError::EmptyField`] if the organization, app name,
    /// or an exact version string is empty, and
    /// [`CoordinateError::InvalidSegment`] if one of them is not a single
    /// path segment.
    pub fn new(
        organization: impl Into<String>,
        app_name: impl Into<String>,
        version: VersionSpec,
    ) -> Result<Self, CoordinateError> {
        let organization = organization.into();
        let app_name = app_name.into();

        validate_segment("organization", &organization)?;
        validate_segment("app_name", &app_name)?;
        if let VersionSpec::Exact(v) = &version {
            validate_segment("version", v)?;
        }

        Ok(Self {
            organization,
            app_name,
            version,
        })
    }

    /// Shorthand for an exact-version coordinate.
    ///
    /// # Errors
    ///
    /// See [`PackageCoordinate::new`].
    pub fn exact(
        organization: impl Into<String>,
        app_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, CoordinateError> {
        Self::new(organization, app_name, VersionSpec::Exact(version.into()))
    }

    /// Shorthand for a `Latest` coordinate.
    ///
    /// # Errors
    ///
    /// See [`PackageCoordinate::new`].
    pub fn latest(
        organization: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Result<Self, CoordinateError> {
        Self::new(organization, app_name, VersionSpec::Latest)
    }

    /// Parse `org/app`, `org/app@latest` or `org/app@1.2.3`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError::InvalidFormat`] if the string has no single
    /// `/` separator, or [`CoordinateError::EmptyField`] for empty parts.
    pub fn parse(s: &str) -> Result<Self, CoordinateError> {
        let (path, version) = match s.split_once('@') {
            Some((path, "latest")) => (path, VersionSpec::Latest),
            Some((path, v)) => (path, VersionSpec::Exact(v.to_string())),
            None => (s, VersionSpec::Latest),
        };

        let Some((org, app)) = path.split_once('/') else {
            return Err(CoordinateError::InvalidFormat(s.to_string()));
        };
        if app.contains('/') {
            return Err(CoordinateError::InvalidFormat(s.to_string()));
        }

        Self::new(org, app, version)
    }

    /// The owning organization.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// The app name.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// The requested version.
    pub fn version(&self) -> &VersionSpec {
        &self.version
    }
}

impl std::fmt::Display for PackageCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.organization, self.app_name, self.version)
    }
}
