//! Content checksum over a package tree.
//!
//! The digest covers every directory path, every file path with its bytes,
//! and every symlink path with its target. Paths are relative to the root,
//! forward-slash separated and hashed in sorted order, so the result does
//! not depend on traversal or creation order.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use appkg_schema::Sha256Hash;

#[derive(Debug)]
enum EntryKind {
    Dir,
    File,
    Symlink(String),
}

/// Join the components of a relative path with `/`.
pub(crate) fn normalize_rel_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_excluded(rel: &str, exclude: &[&str]) -> bool {
    exclude.iter().any(|ex| {
        rel == *ex
            || rel
                .strip_prefix(ex)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Compute the content checksum of the tree under `root`.
///
/// `exclude` lists root-relative paths (and everything beneath them) that
/// do not contribute, e.g. the metadata document itself.
///
/// # Errors
///
/// Returns an I/O error if the tree cannot be walked or a file cannot be read.
pub fn content_checksum(root: &Path, exclude: &[&str]) -> io::Result<Sha256Hash> {
    let mut entries: Vec<(String, EntryKind)> = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;
        let rel = normalize_rel_path(rel);
        if is_excluded(&rel, exclude) {
            continue;
        }

        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            EntryKind::Symlink(normalize_rel_path(&target))
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        entries.push((rel, kind));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (rel, kind) in &entries {
        match kind {
            EntryKind::Dir => {
                hasher.update(b"D");
                hasher.update(rel.as_bytes());
                hasher.update([0]);
            }
            EntryKind::File => {
                let path = root.join(rel);
                let len = fs::metadata(&path)?.len();
                hasher.update(b"F");
                hasher.update(rel.as_bytes());
                hasher.update([0]);
                hasher.update(len.to_le_bytes());
                let mut reader = BufReader::new(File::open(&path)?);
                io::copy(&mut reader, &mut hasher)?;
            }
            EntryKind::Symlink(target) => {
                hasher.update(b"L");
                hasher.update(rel.as_bytes());
                hasher.update([0]);
                hasher.update(target.as_bytes());
                hasher.update([0]);
            }
        }
    }

    Ok(Sha256Hash::from_digest(hasher.finalize().as_slice()))
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

    fn sample_tree(root: &Path) {
        write(root, "widgets/main.mod", "X");
        write(root, "widgets/util/helpers.mod", "helpers");
        write(root, "assets/logo.txt", "logo");
    }

    #[test]
    fn independent_of_creation_order() {
        let a = tempdir().unwrap();
        sample_tree(a.path());

        let b = tempdir().unwrap();
        write(b.path(), "assets/logo.txt", "logo");
        write(b.path(), "widgets/util/helpers.mod", "helpers");
        write(b.path(), "widgets/main.mod", "X");

        assert_eq!(
            content_checksum(a.path(), &[]).unwrap(),
            content_checksum(b.path(), &[]).unwrap()
        );
    }

    #[test]
    fn sensitive_to_edit_add_remove_rename() {
        let dir = tempdir().unwrap();
        sample_tree(dir.path());
        let original = content_checksum(dir.path(), &[]).unwrap();

        write(dir.path(), "widgets/main.mod", "Y");
        assert_ne!(content_checksum(dir.path(), &[]).unwrap(), original);
        write(dir.path(), "widgets/main.mod", "X");
        assert_eq!(content_checksum(dir.path(), &[]).unwrap(), original);

        write(dir.path(), "widgets/extra.mod", "");
        assert_ne!(content_checksum(dir.path(), &[]).unwrap(), original);
        fs::remove_file(dir.path().join("widgets/extra.mod")).unwrap();
        assert_eq!(content_checksum(dir.path(), &[]).unwrap(), original);

        fs::rename(
            dir.path().join("assets/logo.txt"),
            dir.path().join("assets/logo2.txt"),
        )
        .unwrap();
        assert_ne!(content_checksum(dir.path(), &[]).unwrap(), original);
        fs::rename(
            dir.path().join("assets/logo2.txt"),
            dir.path().join("assets/logo.txt"),
        )
        .unwrap();
        assert_eq!(content_checksum(dir.path(), &[]).unwrap(), original);
    }

    #[test]
    fn empty_directory_counts() {
        let dir = tempdir().unwrap();
        sample_tree(dir.path());
        let before = content_checksum(dir.path(), &[]).unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        assert_ne!(content_checksum(dir.path(), &[]).unwrap(), before);
    }

    #[test]
    fn excluded_paths_do_not_contribute() {
        let dir = tempdir().unwrap();
        sample_tree(dir.path());
        let before = content_checksum(dir.path(), &["app_metadata.json"]).unwrap();
        write(dir.path(), "app_metadata.json", "{}");
        assert_eq!(
            content_checksum(dir.path(), &["app_metadata.json"]).unwrap(),
            before
        );
    }

    #[test]
    fn file_boundaries_are_framed() {
        // Same concatenated bytes, different split across files.
        let a = tempdir().unwrap();
        write(a.path(), "a", "xy");
        write(a.path(), "b", "z");
        let b = tempdir().unwrap();
        write(b.path(), "a", "x");
        write(b.path(), "b", "yz");
        assert_ne!(
            content_checksum(a.path(), &[]).unwrap(),
            content_checksum(b.path(), &[]).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_target_counts() {
        let dir = tempdir().unwrap();
        sample_tree(dir.path());
        std::os::unix::fs::symlink("main.mod", dir.path().join("widgets/link")).unwrap();
        let first = content_checksum(dir.path(), &[]).unwrap();

        fs::remove_file(dir.path().join("widgets/link")).unwrap();
        std::os::unix::fs::symlink("util/helpers.mod", dir.path().join("widgets/link")).unwrap();
        assert_ne!(content_checksum(dir.path(), &[]).unwrap(), first);
    }

    #[test]
    fn exclusion_is_path_prefix_aware() {
        assert!(is_excluded("meta", &["meta"]));
        assert!(is_excluded("meta/x", &["meta"]));
        assert!(!is_excluded("metadata", &["meta"]));
    }
}
