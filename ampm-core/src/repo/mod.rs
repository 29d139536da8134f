//! Repository access: the remote gateway over a mounted share and the local
//! content-addressed cache. Both expose the same metadata tree shape
//! (`metadata/<type>/<fingerprint>.toml`), so the scanning code is shared.

pub mod local;
pub mod remote;

use std::fs;
use std::path::{Path, PathBuf};

use ampm_common::model::{is_fingerprint, ArtifactId, ArtifactMetadata};
use ampm_common::{AmpmError, Result};
use tracing::warn;
use walkdir::WalkDir;

pub use local::LocalStore;
pub use remote::RemoteRepo;

/// Record files under `metadata/<type_prefix>`, as (id, path) pairs.
///
/// A prefix matches whole type segments only: `foo` selects type `foo` and
/// every `foo/...` subtype, never `foobar`. An empty prefix selects all.
/// Files whose names are not `<32-char-fingerprint>.toml` are ignored.
pub(crate) fn record_files(
    metadata_root: &Path,
    type_prefix: &str,
) -> Result<Vec<(ArtifactId, PathBuf)>> {
    let prefix = type_prefix.trim_matches('/');
    if prefix.split('/').any(|segment| segment == "..") {
        return Err(AmpmError::InvalidInput(format!(
            "type prefix cannot escape the metadata tree: {type_prefix}"
        )));
    }
    let scan_root = if prefix.is_empty() {
        metadata_root.to_path_buf()
    } else {
        metadata_root.join(prefix)
    };
    if !scan_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(&scan_root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(&scan_root).to_path_buf();
            match e.into_io_error() {
                Some(io) => AmpmError::io(path, io),
                None => AmpmError::io(path, std::io::Error::other("walk failed")),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if path.extension().and_then(|e| e.to_str()) != Some("toml") || !is_fingerprint(stem) {
            continue;
        }
        let Some(type_path) = path
            .parent()
            .and_then(|p| p.strip_prefix(metadata_root).ok())
            .and_then(|p| p.to_str())
        else {
            continue;
        };
        match ArtifactId::new(type_path, stem) {
            Ok(id) => found.push((id, path.to_path_buf())),
            Err(_) => warn!("Skipping record with unusable type path: {}", path.display()),
        }
    }
    Ok(found)
}

/// Walks `metadata/<type_prefix>` and parses every record. Records that fail
/// to parse, or whose recomputed fingerprint disagrees with their file name,
/// are skipped with a warning; they never abort the scan.
pub(crate) fn scan_metadata_tree(
    metadata_root: &Path,
    type_prefix: &str,
) -> Result<Vec<(ArtifactId, ArtifactMetadata)>> {
    let mut records = Vec::new();
    for (id, path) in record_files(metadata_root, type_prefix)? {
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping unreadable record {}: {e}", path.display());
                continue;
            }
        };
        match parse_verified(&bytes, &id, &path) {
            Ok(meta) => records.push((id, meta)),
            Err(e) => warn!("Skipping record {}: {e}", path.display()),
        }
    }
    Ok(records)
}

/// Parses a record and checks it against the fingerprint its file name
/// claims. The fingerprint in any file name must match the co-located record.
pub(crate) fn parse_verified(
    bytes: &[u8],
    id: &ArtifactId,
    path: &Path,
) -> Result<ArtifactMetadata> {
    let meta = ArtifactMetadata::parse(bytes)?;
    let actual = meta.fingerprint()?;
    if actual != id.fingerprint {
        return Err(AmpmError::Integrity {
            path: path.to_path_buf(),
            claimed: id.fingerprint.clone(),
            actual,
        });
    }
    if meta.artifact_type != id.artifact_type {
        return Err(AmpmError::Format(format!(
            "record type `{}` disagrees with its location `{}`",
            meta.artifact_type, id.artifact_type
        )));
    }
    Ok(meta)
}

/// Copies a directory tree, preserving symlinks (as links) and file modes.
/// Directories are created before their contents.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| AmpmError::io(dst, e))?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            match e.into_io_error() {
                Some(io) => AmpmError::io(path, io),
                None => AmpmError::io(path, std::io::Error::other("walk failed")),
            }
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| AmpmError::io(entry.path(), std::io::Error::other("path escape")))?;
        let to = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| AmpmError::io(entry.path(), e))?;
            std::os::unix::fs::symlink(&link, &to).map_err(|e| AmpmError::io(&to, e))?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&to).map_err(|e| AmpmError::io(&to, e))?;
        } else {
            fs::copy(entry.path(), &to).map_err(|e| AmpmError::io(&to, e))?;
        }
    }
    Ok(())
}

/// Write-then-rename within one directory; the rename is the publication
/// point observed by concurrent readers.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AmpmError::io(parent, e))?;
    }
    let tmp = tmp_sibling(path);
    fs::write(&tmp, bytes).map_err(|e| AmpmError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        AmpmError::io(path, e)
    })
}

pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use ampm_common::model::{Compression, PathType};
    use chrono::{TimeZone, Utc};

    pub(crate) fn sample_record(artifact_type: &str, name: &str) -> ArtifactMetadata {
        ArtifactMetadata {
            artifact_type: artifact_type.into(),
            name: name.into(),
            description: String::new(),
            path_type: PathType::File,
            remote_path: None,
            compression: Compression::None,
            attributes: BTreeMap::new(),
            env: BTreeMap::new(),
            pubdate: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn store_record(root: &Path, meta: &ArtifactMetadata) -> ArtifactId {
        let id = meta.id().unwrap();
        let dir = root.join(&id.artifact_type);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{}.toml", id.fingerprint)),
            meta.to_canonical_toml().unwrap(),
        )
        .unwrap();
        id
    }

    #[test]
    fn scan_matches_whole_segments_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let exact = store_record(root, &sample_record("foo", "a.txt"));
        let nested = store_record(root, &sample_record("foo/bar", "b.txt"));
        store_record(root, &sample_record("foobar", "c.txt"));

        let ids: Vec<_> = scan_metadata_tree(root, "foo")
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&exact));
        assert!(ids.contains(&nested));

        assert_eq!(scan_metadata_tree(root, "").unwrap().len(), 3);
        assert!(scan_metadata_tree(root, "nosuch").unwrap().is_empty());
    }

    #[test]
    fn scan_skips_corrupt_records() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let good = store_record(root, &sample_record("foo", "a.txt"));

        // Unparseable record under a valid fingerprint-shaped name.
        fs::write(
            root.join("foo").join(format!("{}.toml", "0".repeat(32))),
            "not toml at all [",
        )
        .unwrap();
        // Parseable record filed under the wrong fingerprint.
        let other = sample_record("foo", "b.txt");
        fs::write(
            root.join("foo").join(format!("{}.toml", "1".repeat(32))),
            other.to_canonical_toml().unwrap(),
        )
        .unwrap();

        let found = scan_metadata_tree(root, "foo").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, good);
    }

    #[test]
    fn copy_tree_preserves_links() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file.txt"), b"hi").unwrap();
        std::os::unix::fs::symlink("sub/file.txt", src.join("link")).unwrap();

        let dst = tmp.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read(dst.join("sub/file.txt")).unwrap(), b"hi");
        assert_eq!(
            fs::read_link(dst.join("link")).unwrap(),
            PathBuf::from("sub/file.txt")
        );
    }
}
