use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use ampm_common::model::{ArtifactId, ArtifactMetadata, Compression, PathType};
use ampm_common::{AmpmError, Result};
use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::repo::{
    copy_tree, parse_verified, record_files, scan_metadata_tree, tmp_sibling, LocalStore,
};

/// The remote repository, reached through a mounted POSIX namespace.
///
/// Two URI schemes are understood:
/// - `file://<path>[#<subdir>]` — the repo root is the path itself.
/// - `nfs://<host><export>[#<subdir>]` — the export must already be mounted;
///   its mount point is located via `/proc/mounts`. The fragment names a
///   subdirectory beneath the mount root.
#[derive(Debug)]
pub struct RemoteRepo {
    uri: String,
    root: PathBuf,
}

impl RemoteRepo {
    pub fn open(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri.split_once("://").ok_or_else(|| {
            AmpmError::Config(format!(
                "repo URI must be in the form `protocol://host/path`, got: {uri}"
            ))
        })?;
        let (base, fragment) = match rest.split_once('#') {
            Some((base, fragment)) => (base, fragment.trim_matches('/')),
            None => (rest, ""),
        };

        let mount_root = match scheme {
            "file" => PathBuf::from(base),
            "nfs" => {
                let (host, export) = base.split_once('/').ok_or_else(|| {
                    AmpmError::Config(format!("nfs URI must name a host and an export: {uri}"))
                })?;
                locate_nfs_mount(host, &format!("/{}", export.trim_matches('/')))?
            }
            other => {
                return Err(AmpmError::Config(format!(
                    "unknown repository protocol `{other}` in {uri}"
                )))
            }
        };
        let root = if fragment.is_empty() {
            mount_root
        } else {
            mount_root.join(fragment)
        };

        if !root.is_dir() {
            return Err(AmpmError::Connect(format!(
                "repository root {} does not exist",
                root.display()
            )));
        }
        debug!("Remote repo {} rooted at {}", uri, root.display());
        Ok(Self {
            uri: uri.to_string(),
            root,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_root(&self) -> PathBuf {
        self.root.join("metadata")
    }

    fn record_path(&self, id: &ArtifactId) -> PathBuf {
        self.metadata_root()
            .join(&id.artifact_type)
            .join(format!("{}.toml", id.fingerprint))
    }

    /// All records under the type prefix. Unparseable records are skipped
    /// with a warning.
    pub fn list(&self, type_prefix: &str) -> Result<Vec<(ArtifactId, ArtifactMetadata)>> {
        scan_metadata_tree(&self.metadata_root(), type_prefix)
    }

    /// One record by exact identifier, fingerprint-verified.
    pub fn fetch_record(&self, id: &ArtifactId) -> Result<ArtifactMetadata> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AmpmError::NotFound(id.to_string()))
            }
            Err(e) => return Err(AmpmError::io(&path, e)),
        };
        parse_verified(&bytes, id, &path)
    }

    /// Materializes the payload into `dest` (a staging directory), placing it
    /// at `dest/<name>` and decompressing per the record's compression.
    pub fn fetch_payload(&self, meta: &ArtifactMetadata, dest: &Path) -> Result<()> {
        let remote = self.root.join(meta.remote_payload_path()?);
        let target = dest.join(&meta.name);
        debug!(
            "Fetching {} -> {}",
            remote.display(),
            target.display()
        );
        match (meta.path_type, meta.compression) {
            (PathType::File, Compression::None) => {
                fs::copy(&remote, &target).map_err(|e| AmpmError::io(&remote, e))?;
            }
            (PathType::File, Compression::Gzip) => {
                let input = File::open(&remote).map_err(|e| AmpmError::io(&remote, e))?;
                let mut decoder = GzDecoder::new(io::BufReader::new(input));
                let mut output = File::create(&target).map_err(|e| AmpmError::io(&target, e))?;
                io::copy(&mut decoder, &mut output).map_err(|e| AmpmError::io(&remote, e))?;
            }
            (PathType::Dir, Compression::None) => {
                copy_tree(&remote, &target)?;
            }
            (PathType::Dir, Compression::TarGzip) => {
                fs::create_dir_all(&target).map_err(|e| AmpmError::io(&target, e))?;
                let input = File::open(&remote).map_err(|e| AmpmError::io(&remote, e))?;
                let mut archive = tar::Archive::new(GzDecoder::new(io::BufReader::new(input)));
                archive.set_preserve_permissions(true);
                archive
                    .unpack(&target)
                    .map_err(|e| AmpmError::io(&remote, e))?;
            }
            (PathType::File, Compression::TarGzip) | (PathType::Dir, Compression::Gzip) => {
                return Err(AmpmError::Format(format!(
                    "record {} pairs an invalid compression with its path type",
                    meta.name
                )))
            }
        }
        Ok(())
    }

    /// Publishes a payload and its record. The payload is staged under a
    /// `.tmp` name and renamed, then the record is written the same way; the
    /// record rename is the publication point. Re-publishing an existing
    /// fingerprint is a no-op reported as success (returns `false`).
    pub fn publish(&self, meta: &ArtifactMetadata, payload: Option<&Path>) -> Result<bool> {
        let id = meta.id()?;
        let record_path = self.record_path(&id);
        if record_path.exists() {
            info!("{id} is already published");
            return Ok(false);
        }

        if let Some(src) = payload {
            self.publish_payload(meta, src)?;
        }

        if let Some(parent) = record_path.parent() {
            fs::create_dir_all(parent).map_err(|e| AmpmError::io(parent, e))?;
        }
        let tmp = tmp_sibling(&record_path);
        fs::write(&tmp, meta.to_canonical_toml()?).map_err(|e| AmpmError::io(&tmp, e))?;
        fs::rename(&tmp, &record_path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            AmpmError::io(&record_path, e)
        })?;
        Ok(true)
    }

    fn publish_payload(&self, meta: &ArtifactMetadata, src: &Path) -> Result<()> {
        // With an explicit remote_path the payload lands exactly there; the
        // derived layout wraps it in artifacts/<type>/<fp>/.
        let (staging, final_path, inner): (PathBuf, PathBuf, PathBuf) =
            if meta.remote_path.is_some() {
                let final_path = self.root.join(meta.remote_payload_path()?);
                let staging = tmp_sibling(&final_path);
                (staging.clone(), final_path, staging)
            } else {
                let final_dir = self.root.join(meta.remote_payload_dir()?);
                let staging = tmp_sibling(&final_dir);
                let inner = staging.join(format!("{}{}", meta.name, meta.compression.suffix()));
                (staging, final_dir, inner)
            };

        if final_path.exists() {
            // Payload from an earlier interrupted publication; the record
            // rename below still decides visibility.
            debug!("Payload already present at {}", final_path.display());
            return Ok(());
        }
        if staging.exists() {
            remove_any(&staging)?;
        }

        let result = (|| -> Result<()> {
            if let Some(parent) = inner.parent() {
                fs::create_dir_all(parent).map_err(|e| AmpmError::io(parent, e))?;
            }
            if src.is_dir() {
                copy_tree(src, &inner)?;
            } else {
                fs::copy(src, &inner).map_err(|e| AmpmError::io(src, e))?;
            }
            fs::rename(&staging, &final_path).map_err(|e| AmpmError::io(&final_path, e))
        })();
        if result.is_err() {
            let _ = remove_any(&staging);
        }
        result
    }

    /// Deletes a record and the payload it references. Exact fingerprints
    /// only; the record is removed first so readers stop observing it.
    pub fn remove(&self, id: &ArtifactId) -> Result<()> {
        let meta = self.fetch_record(id)?;
        let record_path = self.record_path(id);
        fs::remove_file(&record_path).map_err(|e| AmpmError::io(&record_path, e))?;

        let payload = if meta.remote_path.is_some() {
            self.root.join(meta.remote_payload_path()?)
        } else {
            self.root.join(meta.remote_payload_dir()?)
        };
        if payload.exists() {
            remove_any(&payload)?;
        }
        info!("Removed {id}");
        Ok(())
    }

    /// Mirrors every record under the type prefix into the local cache's
    /// metadata tree, so queries run against the mirror and keep working
    /// offline. Individual failures are skipped with a warning.
    pub fn sync_metadata(&self, type_prefix: &str, local: &LocalStore) -> Result<()> {
        for (id, path) in record_files(&self.metadata_root(), type_prefix)? {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable record {}: {e}", path.display());
                    continue;
                }
            };
            local.store_record_bytes(&id, &bytes)?;
        }
        Ok(())
    }
}

fn remove_any(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| AmpmError::io(path, e))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(|e| AmpmError::io(path, e))
    } else {
        fs::remove_file(path).map_err(|e| AmpmError::io(path, e))
    }
}

/// Finds where `host:/export` is mounted by scanning `/proc/mounts`.
fn locate_nfs_mount(host: &str, export: &str) -> Result<PathBuf> {
    let source = format!("{host}:{export}");
    let mounts = fs::read_to_string("/proc/mounts")
        .map_err(|e| AmpmError::Connect(format!("cannot read /proc/mounts: {e}")))?;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(mount_source), Some(mount_point)) = (fields.next(), fields.next()) else {
            continue;
        };
        if mount_source == source || mount_source == format!("{host}:{}", export.trim_end_matches('/'))
        {
            return Ok(PathBuf::from(mount_point));
        }
    }
    Err(AmpmError::Connect(format!(
        "NFS share {source} is not mounted"
    )))
}
