//! Package archive codec.
//!
//! Archives are zstd-compressed tarballs with a flat layout: the app's module
//! directory, any other packaged root files, and `app_metadata.json` all sit
//! at the archive root. Entries are written in sorted order with zeroed
//! timestamps and ownership, so the same tree always produces the same bytes.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use tar::{EntryType, Header};
use thiserror::Error;
use walkdir::WalkDir;
use zstd::stream::read::Decoder as ZstdDecoder;
use zstd::stream::write::Encoder as ZstdEncoder;

use appkg_schema::{AppMetadata, METADATA_FILE_NAME, PackageType, Sha256Hash, validate_segment};

use crate::checksum::{content_checksum, normalize_rel_path};
use crate::ignore::{IGNORE_FILE_NAME, IgnoreRules};

/// Optional package manifest, staged verbatim when present.
pub const MANIFEST_FILE_NAME: &str = "appkg.toml";

/// Optional install-hook script, staged verbatim when present.
pub const INSTALL_HOOK_FILE_NAME: &str = "install_hook.sh";

/// zstd level used for new archives.
const COMPRESSION_LEVEL: i32 = 3;

/// Top-level names never picked up by the filtered walk.
const RESERVED_TOP_LEVEL: [&str; 4] = [
    METADATA_FILE_NAME,
    IGNORE_FILE_NAME,
    MANIFEST_FILE_NAME,
    INSTALL_HOOK_FILE_NAME,
];

/// Reserved names copied as-is, bypassing ignore rules.
const VERBATIM_TOP_LEVEL: [&str; 2] = [MANIFEST_FILE_NAME, INSTALL_HOOK_FILE_NAME];

/// Errors raised while building, reading or extracting archives.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Filesystem failure while staging, writing or unpacking.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The source tree to build from does not exist.
    #[error("Source tree not found: {0}")]
    SourceMissing(PathBuf),

    /// Metadata handed to the builder is incomplete or unsafe.
    #[error("Invalid metadata: {0}")]
    Precondition(String),

    /// The bytes are not a readable zstd tarball.
    #[error("Archive is corrupt: {0}")]
    Corrupt(String),

    /// No metadata document at the archive root.
    #[error("Archive metadata missing: no {METADATA_FILE_NAME} at archive root")]
    MissingMetadata,

    /// The metadata document is not valid JSON for [`AppMetadata`].
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(#[source] serde_json::Error),

    /// An entry or link would land outside the extraction root.
    #[error("Invalid path in archive: {0}")]
    PathTraversal(String),

    /// Extracted content does not hash to the declared checksum.
    #[error("Content checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum recorded in the metadata.
        expected: Sha256Hash,
        /// Checksum of what was extracted.
        actual: Sha256Hash,
    },
}

fn require(field: &'static str, value: &str) -> Result<(), ArchiveError> {
    if value.trim().is_empty() {
        return Err(ArchiveError::Precondition(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_segment(field: &'static str, value: &str) -> Result<(), ArchiveError> {
    require(field, value)?;
    validate_segment(field, value).map_err(|e| ArchiveError::Precondition(e.to_string()))
}

fn validate_metadata(meta: &AppMetadata) -> Result<(), ArchiveError> {
    require_segment("organization", &meta.organization)?;
    require_segment("app_name", &meta.app_name)?;
    require("package_name", &meta.package_name)?;
    require_segment("package_version", &meta.package_version)
}

/// Build an archive from `source`.
///
/// Walks the tree once, skipping the reserved top-level files and anything
/// `rules` excludes; production builds also apply
/// [`IgnoreRules::production`]. The surviving entries are staged, their
/// content checksum is written into `meta.content_checksum`, and the
/// metadata document is added before compression.
///
/// # Errors
///
/// Returns [`ArchiveError::Precondition`] for incomplete metadata,
/// [`ArchiveError::SourceMissing`] if `source` is not a directory, and
/// [`ArchiveError::Io`] for failures while staging or compressing.
pub fn build_archive(
    source: &Path,
    meta: &mut AppMetadata,
    rules: &IgnoreRules,
) -> Result<Vec<u8>, ArchiveError> {
    validate_metadata(meta)?;
    if !source.is_dir() {
        return Err(ArchiveError::SourceMissing(source.to_path_buf()));
    }

    let rules = match meta.package_type {
        PackageType::Prod => rules.union(&IgnoreRules::production()),
        PackageType::Dev => rules.clone(),
    };

    let staging = tempfile::Builder::new().prefix("appkg-stage-").tempdir()?;
    let staged = stage_tree(source, staging.path(), &rules)?;
    tracing::debug!(
        "Staged {} entries from {} ({} build)",
        staged,
        source.display(),
        meta.package_type
    );

    if !staging.path().join(&meta.app_name).is_dir() {
        tracing::warn!(
            "No module directory '{}' at the root of {}",
            meta.app_name,
            source.display()
        );
    }

    meta.content_checksum = content_checksum(staging.path(), &[METADATA_FILE_NAME])?;
    let json = meta.to_json().map_err(io::Error::other)?;
    fs::write(staging.path().join(METADATA_FILE_NAME), json)?;

    let bytes = write_tar_zst(staging.path())?;
    tracing::info!(
        "Built {}/{} {} ({} bytes, checksum {})",
        meta.organization,
        meta.app_name,
        meta.package_version,
        bytes.len(),
        meta.content_checksum
    );
    Ok(bytes)
}

/// [`build_archive`], writing the result to `dest`. A partially written
/// file is removed on failure.
///
/// # Errors
///
/// See [`build_archive`]; also fails if `dest` cannot be written.
pub fn build_archive_to(
    source: &Path,
    meta: &mut AppMetadata,
    rules: &IgnoreRules,
    dest: &Path,
) -> Result<(), ArchiveError> {
    let bytes = build_archive(source, meta, rules)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(e) = fs::write(dest, &bytes) {
        fs::remove_file(dest).ok();
        return Err(e.into());
    }
    Ok(())
}

/// Copy the filtered tree into `staging`. Returns the number of entries.
fn stage_tree(source: &Path, staging: &Path, rules: &IgnoreRules) -> Result<usize, ArchiveError> {
    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let rel = entry
                .path()
                .strip_prefix(source)
                .map(normalize_rel_path)
                .unwrap_or_default();
            if entry.depth() == 1 && RESERVED_TOP_LEVEL.contains(&rel.as_str()) {
                return false;
            }
            !rules.is_ignored(&rel, entry.file_type().is_dir())
        });

    let mut count = 0;
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        stage_entry(entry.path(), &staging.join(rel), entry.file_type())?;
        count += 1;
    }

    for name in VERBATIM_TOP_LEVEL {
        let path = source.join(name);
        if path.is_file() {
            fs::copy(&path, staging.join(name))?;
            count += 1;
        }
    }

    Ok(count)
}

fn stage_entry(src: &Path, dst: &Path, file_type: fs::FileType) -> io::Result<()> {
    if file_type.is_dir() {
        return fs::create_dir_all(dst);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if file_type.is_symlink() {
        let target = fs::read_link(src)?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, dst)?;
        #[cfg(not(unix))]
        tracing::warn!(
            "Skipping symlink {} -> {} (unsupported on this platform)",
            src.display(),
            target.display()
        );
        return Ok(());
    }
    fs::copy(src, dst).map(|_| ())
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}

/// Write a reproducible tar.zst of everything under `root`.
fn write_tar_zst(root: &Path) -> io::Result<Vec<u8>> {
    let encoder = ZstdEncoder::new(Vec::new(), COMPRESSION_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry.path().strip_prefix(root).map_err(io::Error::other)?;
        let rel = normalize_rel_path(rel);
        let metadata = fs::symlink_metadata(entry.path())?;
        let file_type = metadata.file_type();

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            header.set_entry_type(EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            builder.append_link(&mut header, &rel, &target)?;
        } else if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, &rel, io::empty())?;
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(file_mode(&metadata));
            header.set_size(metadata.len());
            let file = BufReader::new(File::open(entry.path())?);
            builder.append_data(&mut header, &rel, file)?;
        }
    }

    builder.into_inner()?.finish()
}

/// Map an archive entry path to a safe relative path.
///
/// Rejects absolute paths and any `..` component; `.` components are dropped.
fn sanitize_entry_path(path: &Path) -> Result<PathBuf, ArchiveError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathTraversal(path.display().to_string()));
            }
        }
    }
    Ok(clean)
}

/// Reject writes through a symlink planted by an earlier entry.
fn ensure_no_symlink_ancestors(target: &Path, rel: &Path) -> Result<(), ArchiveError> {
    let mut current = target.to_path_buf();
    let mut components = rel.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        if fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
            return Err(ArchiveError::PathTraversal(rel.display().to_string()));
        }
    }
    Ok(())
}

fn unpack<R: Read>(reader: R, target: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(target)?;

    let decoder = ZstdDecoder::new(reader)?;
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_mtime(false);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel = sanitize_entry_path(&entry.path()?)?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        ensure_no_symlink_ancestors(target, &rel)?;
        let dest = target.join(&rel);

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        // Hard links name another entry of the same archive.
        if entry_type.is_hard_link() {
            let link = entry.link_name()?.ok_or_else(|| {
                ArchiveError::Corrupt(format!("hard link without target: {}", rel.display()))
            })?;
            let link_rel = sanitize_entry_path(&link)?;
            ensure_no_symlink_ancestors(target, &link_rel)?;
            let source = target.join(&link_rel);
            if fs::symlink_metadata(&source).is_ok_and(|m| m.file_type().is_symlink()) {
                return Err(ArchiveError::PathTraversal(link.display().to_string()));
            }
            fs::hard_link(source, &dest)?;
            continue;
        }
        entry.unpack(&dest)?;
    }

    Ok(())
}

/// Extract archive bytes into `target`.
///
/// `target` is created if needed but never cleared; callers that want a
/// clean directory remove it first.
///
/// # Errors
///
/// Returns [`ArchiveError::PathTraversal`] if any entry would land outside
/// `target`, or [`ArchiveError::Io`] for decompression and write failures.
pub fn extract_archive(bytes: &[u8], target: &Path) -> Result<(), ArchiveError> {
    unpack(bytes, target)
}

/// [`extract_archive`] reading from a file.
///
/// # Errors
///
/// See [`extract_archive`].
pub fn extract_archive_file(archive_path: &Path, target: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive_path)?;
    unpack(BufReader::new(file), target)
}

fn is_metadata_entry(path: &Path) -> bool {
    sanitize_entry_path(path).is_ok_and(|p| p == Path::new(METADATA_FILE_NAME))
}

fn metadata_from_reader<R: Read>(reader: R) -> Result<AppMetadata, ArchiveError> {
    let corrupt = |e: io::Error| ArchiveError::Corrupt(e.to_string());

    let decoder = ZstdDecoder::new(reader).map_err(corrupt)?;
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !is_metadata_entry(&entry.path().map_err(corrupt)?) {
            continue;
        }
        let mut json = String::new();
        entry.read_to_string(&mut json).map_err(corrupt)?;
        return AppMetadata::from_json(&json).map_err(ArchiveError::MalformedMetadata);
    }

    Err(ArchiveError::MissingMetadata)
}

/// Read the root metadata document without extracting anything else.
///
/// # Errors
///
/// Returns [`ArchiveError::MissingMetadata`] if the archive has no
/// `app_metadata.json`, [`ArchiveError::MalformedMetadata`] if it cannot be
/// parsed, or [`ArchiveError::Corrupt`] if the archive itself is unreadable.
pub fn read_metadata(bytes: &[u8]) -> Result<AppMetadata, ArchiveError> {
    metadata_from_reader(bytes)
}

/// [`read_metadata`] reading from a file.
///
/// # Errors
///
/// See [`read_metadata`]; also fails if the file cannot be opened.
pub fn read_metadata_file(archive_path: &Path) -> Result<AppMetadata, ArchiveError> {
    let file = File::open(archive_path)?;
    metadata_from_reader(BufReader::new(file))
}

/// List entry paths (forward-slash, directories with a trailing `/`).
///
/// # Errors
///
/// Returns [`ArchiveError::Corrupt`] if the archive cannot be read.
pub fn archive_entries(bytes: &[u8]) -> Result<Vec<String>, ArchiveError> {
    let corrupt = |e: io::Error| ArchiveError::Corrupt(e.to_string());

    let decoder = ZstdDecoder::new(bytes).map_err(corrupt)?;
    let mut archive = tar::Archive::new(decoder);
    let mut names = Vec::new();
    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        let mut name = normalize_rel_path(&entry.path().map_err(corrupt)?);
        if entry.header().entry_type().is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    Ok(names)
}

/// Check an extracted tree against the checksum its metadata declares.
///
/// The metadata document itself is excluded, matching how the checksum
/// was computed at build time.
///
/// # Errors
///
/// Returns [`ArchiveError::ChecksumMismatch`] if the tree differs, or
/// [`ArchiveError::Io`] if it cannot be read.
pub fn verify_content_checksum(root: &Path, expected: &Sha256Hash) -> Result<(), ArchiveError> {
    let actual = content_checksum(root, &[METADATA_FILE_NAME])?;
    if actual.matches(expected) {
        Ok(())
    } else {
        Err(ArchiveError::ChecksumMismatch {
            expected: expected.clone(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn widgets_source() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        write(dir.path(), "widgets/main.mod", "X");
        write(dir.path(), "widgets/test_helper.mod", "Y");
        write(dir.path(), "widgets/tests/unit.mod", "T");
        write(dir.path(), "widgets/__pycache__/main.pyc", "junk");
        write(dir.path(), "assets/logo.txt", "logo");
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main");
        write(dir.path(), MANIFEST_FILE_NAME, "[package]\n");
        write(dir.path(), METADATA_FILE_NAME, "stale");
        dir
    }

    fn files_only(entries: &[String]) -> Vec<String> {
        entries
            .iter()
            .filter(|e| !e.ends_with('/'))
            .cloned()
            .collect()
    }

    fn meta(package_type: PackageType) -> AppMetadata {
        AppMetadata {
            package_type,
            description: "Widget toolkit".to_string(),
            ..AppMetadata::new("acme", "widgets", "2.0.0")
        }
    }

    #[test]
    fn prod_archive_matches_example_layout() {
        let dir = tempdir().unwrap();
        write(dir.path(), "widgets/main.mod", "X");
        write(dir.path(), "widgets/test_helper.mod", "Y");

        let mut meta = meta(PackageType::Prod);
        let bytes = build_archive(dir.path(), &mut meta, &IgnoreRules::defaults()).unwrap();
        let mut files = files_only(&archive_entries(&bytes).unwrap());
        files.sort();

        assert_eq!(files, [METADATA_FILE_NAME, "widgets/main.mod"]);
        assert!(!meta.content_checksum.is_empty());
    }

    #[test]
    fn prod_is_subset_of_dev() {
        let source = widgets_source();

        let prod = build_archive(
            source.path(),
            &mut meta(PackageType::Prod),
            &IgnoreRules::defaults(),
        )
        .unwrap();
        let dev = build_archive(
            source.path(),
            &mut meta(PackageType::Dev),
            &IgnoreRules::defaults(),
        )
        .unwrap();

        let prod = archive_entries(&prod).unwrap();
        let dev = archive_entries(&dev).unwrap();
        assert!(prod.iter().all(|e| dev.contains(e)));
        assert!(dev.contains(&"widgets/test_helper.mod".to_string()));
        assert!(dev.contains(&"widgets/tests/unit.mod".to_string()));
        assert!(!prod.iter().any(|e| e.contains("test")));
    }

    #[test]
    fn default_ignores_and_reserved_files() {
        let source = widgets_source();
        let mut meta = meta(PackageType::Dev);
        let bytes = build_archive(source.path(), &mut meta, &IgnoreRules::defaults()).unwrap();
        let entries = archive_entries(&bytes).unwrap();

        assert!(!entries.iter().any(|e| e.starts_with(".git")));
        assert!(!entries.iter().any(|e| e.contains("__pycache__")));
        assert!(entries.contains(&MANIFEST_FILE_NAME.to_string()));
        assert!(entries.contains(&"assets/logo.txt".to_string()));

        // The stale metadata file is replaced, not packaged twice.
        let count = entries.iter().filter(|e| *e == METADATA_FILE_NAME).count();
        assert_eq!(count, 1);
        assert_eq!(read_metadata(&bytes).unwrap(), meta);
    }

    #[test]
    fn manifest_bypasses_ignore_rules() {
        let source = widgets_source();
        let rules = IgnoreRules::parse("*.toml");
        let bytes = build_archive(source.path(), &mut meta(PackageType::Dev), &rules).unwrap();
        let entries = archive_entries(&bytes).unwrap();
        assert!(entries.contains(&MANIFEST_FILE_NAME.to_string()));
    }

    #[test]
    fn round_trip_reproduces_tree() {
        let source = widgets_source();
        let mut meta = meta(PackageType::Dev);
        let bytes = build_archive(source.path(), &mut meta, &IgnoreRules::defaults()).unwrap();

        let out = tempdir().unwrap();
        extract_archive(&bytes, out.path()).unwrap();

        assert_eq!(
            fs::read_to_string(out.path().join("widgets/main.mod")).unwrap(),
            "X"
        );
        assert_eq!(
            fs::read_to_string(out.path().join("assets/logo.txt")).unwrap(),
            "logo"
        );
        assert!(!out.path().join(".git").exists());
        assert_eq!(
            content_checksum(out.path(), &[METADATA_FILE_NAME]).unwrap(),
            meta.content_checksum
        );
    }

    #[test]
    fn checksum_ignores_version() {
        let source = widgets_source();
        let mut first = meta(PackageType::Prod);
        let mut second = AppMetadata {
            package_version: "9.9.9".to_string(),
            ..meta(PackageType::Prod)
        };
        build_archive(source.path(), &mut first, &IgnoreRules::defaults()).unwrap();
        build_archive(source.path(), &mut second, &IgnoreRules::defaults()).unwrap();
        assert_eq!(first.content_checksum, second.content_checksum);
    }

    #[test]
    fn builds_are_reproducible() {
        let source = widgets_source();
        let a = build_archive(
            source.path(),
            &mut meta(PackageType::Prod),
            &IgnoreRules::defaults(),
        )
        .unwrap();
        let b = build_archive(
            source.path(),
            &mut meta(PackageType::Prod),
            &IgnoreRules::defaults(),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_version_is_precondition_error() {
        let source = widgets_source();
        let mut meta = AppMetadata::new("acme", "widgets", "");
        let err = build_archive(source.path(), &mut meta, &IgnoreRules::defaults()).unwrap_err();
        assert!(matches!(err, ArchiveError::Precondition(_)));
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = tempdir().unwrap();
        let err = build_archive(
            &dir.path().join("nope"),
            &mut meta(PackageType::Prod),
            &IgnoreRules::defaults(),
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::SourceMissing(_)));
    }

    #[test]
    fn build_archive_to_writes_file() {
        let source = widgets_source();
        let out = tempdir().unwrap();
        let dest = out.path().join("dist/widgets-2.0.0.tar.zst");
        build_archive_to(
            source.path(),
            &mut meta(PackageType::Prod),
            &IgnoreRules::defaults(),
            &dest,
        )
        .unwrap();
        assert_eq!(read_metadata_file(&dest).unwrap().app_name, "widgets");
    }

    fn raw_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = ZstdEncoder::new(Vec::new(), 1).unwrap();
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in entries {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            // set_path refuses `..`, so write the name bytes directly.
            let name = &mut header.as_old_mut().name;
            name[..path.len()].copy_from_slice(path.as_bytes());
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn extract_rejects_parent_traversal() {
        let bytes = raw_archive(&[("../escape.txt", b"evil")]);
        let root = tempdir().unwrap();
        let target = root.path().join("target");
        let err = extract_archive(&bytes, &target).unwrap_err();
        assert!(matches!(err, ArchiveError::PathTraversal(_)));
        assert!(!root.path().join("escape.txt").exists());
    }

    #[test]
    fn hard_link_through_symlink_is_rejected() {
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret"), "top secret").unwrap();

        let encoder = ZstdEncoder::new(Vec::new(), 1).unwrap();
        let mut builder = tar::Builder::new(encoder);
        for (kind, name, link) in [
            (EntryType::Symlink, "s", outside.path().to_path_buf()),
            (EntryType::Link, "x", PathBuf::from("s/secret")),
        ] {
            let mut header = Header::new_gnu();
            header.set_entry_type(kind);
            header.set_size(0);
            header.set_mode(0o777);
            builder.append_link(&mut header, name, &link).unwrap();
        }
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let root = tempdir().unwrap();
        let err = extract_archive(&bytes, root.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::PathTraversal(_)));
        assert!(!root.path().join("x").exists());
        assert_eq!(
            fs::read_to_string(outside.path().join("secret")).unwrap(),
            "top secret"
        );
    }

    #[test]
    fn dot_segment_version_is_precondition_error() {
        let source = widgets_source();
        let out = tempdir().unwrap();
        let mut meta = AppMetadata::new("acme", "widgets", "../../escape");
        let err = build_archive_to(
            source.path(),
            &mut meta,
            &IgnoreRules::defaults(),
            &out.path().join("widgets.tar.zst"),
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::Precondition(_)));
        assert!(!out.path().join("widgets.tar.zst").exists());

        let mut meta = AppMetadata::new("..", "widgets", "1.0.0");
        let err = build_archive(source.path(), &mut meta, &IgnoreRules::defaults()).unwrap_err();
        assert!(matches!(err, ArchiveError::Precondition(_)));
    }

    #[test]
    fn read_metadata_missing() {
        let bytes = raw_archive(&[("widgets/main.mod", b"X")]);
        assert!(matches!(
            read_metadata(&bytes),
            Err(ArchiveError::MissingMetadata)
        ));
    }

    #[test]
    fn read_metadata_malformed() {
        let bytes = raw_archive(&[(METADATA_FILE_NAME, b"{not json")]);
        assert!(matches!(
            read_metadata(&bytes),
            Err(ArchiveError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn read_metadata_rejects_garbage() {
        assert!(matches!(
            read_metadata(b"definitely not zstd"),
            Err(ArchiveError::Corrupt(_))
        ));
    }

    #[test]
    fn verify_detects_tampering() {
        let source = widgets_source();
        let mut meta = meta(PackageType::Prod);
        let bytes = build_archive(source.path(), &mut meta, &IgnoreRules::defaults()).unwrap();

        let out = tempdir().unwrap();
        extract_archive(&bytes, out.path()).unwrap();
        verify_content_checksum(out.path(), &meta.content_checksum).unwrap();

        write(out.path(), "widgets/main.mod", "tampered");
        assert!(matches!(
            verify_content_checksum(out.path(), &meta.content_checksum),
            Err(ArchiveError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn extract_keeps_existing_files() {
        let bytes = raw_archive(&[("widgets/main.mod", b"X")]);
        let target = tempdir().unwrap();
        fs::write(target.path().join("keep.txt"), "keep").unwrap();
        extract_archive(&bytes, target.path()).unwrap();
        assert!(target.path().join("keep.txt").exists());
        assert!(target.path().join("widgets/main.mod").exists());
    }

    #[cfg(unix)]
    #[test]
    fn extract_preserves_mode_bits() {
        use std::os::unix::fs::PermissionsExt;

        let source = tempdir().unwrap();
        write(source.path(), "widgets/run.sh", "#!/bin/sh\n");
        fs::set_permissions(
            source.path().join("widgets/run.sh"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let bytes = build_archive(
            source.path(),
            &mut meta(PackageType::Prod),
            &IgnoreRules::defaults(),
        )
        .unwrap();
        let out = tempdir().unwrap();
        extract_archive(&bytes, out.path()).unwrap();

        let mode = fs::metadata(out.path().join("widgets/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
