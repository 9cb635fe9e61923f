//! Core engine for appkg: build and extract app archives, keep a versioned
//! local store, talk to HTTP repositories and resolve coordinates across
//! all of them.
//!
//! Start from [`Resolver`] with a [`Config`]:
//!
//! ```no_run
//! use appkg_core::{Config, Resolver};
//! use appkg_schema::PackageCoordinate;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = Resolver::new(Config::from_home()?)?;
//! let resolved = resolver.resolve(&PackageCoordinate::parse("acme/widgets@latest")?)?;
//! println!("{}", resolved.app_module_path().display());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod error;
pub mod ignore;
pub mod paths;
pub mod repository;
pub mod resolver;
pub mod search;
pub mod store;
pub mod version;

pub use archive::{ArchiveError, build_archive, extract_archive, read_metadata};
pub use cache::ArchiveCache;
pub use checksum::content_checksum;
pub use config::{Config, ConfigError};
pub use error::{Error, ErrorKind};
pub use ignore::IgnoreRules;
pub use repository::{CachedArchive, RepositoryClient, RepositoryError};
pub use resolver::{ResolutionOrigin, ResolvedPackage, Resolver};
pub use search::SearchQuery;
pub use store::{InstalledPackage, LocalStore, StoreError};

/// User Agent string for repository requests
pub const USER_AGENT: &str = concat!("appkg-core/", env!("CARGO_PKG_VERSION"));
