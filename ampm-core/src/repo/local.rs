use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use ampm_common::model::{ArtifactId, ArtifactMetadata};
use ampm_common::{AmpmError, Config, Result};
use fs4::FileExt;
use tracing::debug;

use crate::repo::{scan_metadata_tree, write_atomic};

/// The local content-addressed cache. Doubles as the offline gateway: its
/// metadata tree has the same shape as the remote's and is scanned the same
/// way.
#[derive(Debug, Clone)]
pub struct LocalStore {
    config: Config,
}

impl LocalStore {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cached records under the type prefix.
    pub fn scan(&self, type_prefix: &str) -> Result<Vec<(ArtifactId, ArtifactMetadata)>> {
        scan_metadata_tree(&self.config.metadata_root(), type_prefix)
    }

    /// The cached record for an exact identifier, if present. Unlike scans,
    /// an exact lookup surfaces corruption as a hard error.
    pub fn load_record(&self, id: &ArtifactId) -> Result<Option<ArtifactMetadata>> {
        let path = self.config.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AmpmError::io(&path, e)),
        };
        crate::repo::parse_verified(&bytes, id, &path).map(Some)
    }

    /// Mirrors raw record bytes into the cache, atomically.
    pub fn store_record_bytes(&self, id: &ArtifactId, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.config.record_path(id), bytes)
    }

    /// Where the payload for this record materializes.
    pub fn payload_path(&self, id: &ArtifactId, meta: &ArtifactMetadata) -> PathBuf {
        self.config.artifact_dir(id).join(&meta.name)
    }

    /// The no-lock fast check: a published `.target` whose link text still
    /// points at an existing payload. Reads the link text, never resolves
    /// through it.
    pub fn cached_target(&self, id: &ArtifactId) -> Option<PathBuf> {
        let text = fs::read_link(self.config.target_path(id)).ok()?;
        if text.exists() {
            Some(text)
        } else {
            None
        }
    }

    /// Contents of the pre-rendered `.env` side-file.
    pub fn env_script(&self, id: &ArtifactId) -> Result<String> {
        let path = self.config.env_path(id);
        fs::read_to_string(&path).map_err(|e| AmpmError::io(&path, e))
    }

    /// Materializes the payload for `id` exactly once per host, even under
    /// concurrent callers, and returns its absolute path.
    ///
    /// `fetch` is invoked with the staging directory on a cache miss; it must
    /// leave the payload at `<staging>/<name>`.
    pub fn ensure_local<F>(
        &self,
        id: &ArtifactId,
        meta: &ArtifactMetadata,
        fetch: F,
    ) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if let Some(path) = self.cached_target(id) {
            return Ok(path);
        }

        let lock_path = self.config.lock_path(id);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| AmpmError::io(parent, e))?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| AmpmError::io(&lock_path, e))?;
        debug!("Waiting for {}", lock_path.display());
        lock_file
            .lock_exclusive()
            .map_err(|e| AmpmError::io(&lock_path, e))?;

        let result = self.materialize_locked(id, meta, fetch);
        let _ = lock_file.unlock();
        result
    }

    fn materialize_locked<F>(&self, id: &ArtifactId, meta: &ArtifactMetadata, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        // Double-checked: another process may have finished while we waited.
        if let Some(path) = self.cached_target(id) {
            debug!("{id} materialized while waiting for the lock");
            return Ok(path);
        }

        let final_dir = self.config.artifact_dir(id);
        if !final_dir.is_dir() {
            let staging = self.config.artifact_staging_dir(id);
            if staging.exists() {
                // Left over from an interrupted fetch; we own the lock now.
                fs::remove_dir_all(&staging).map_err(|e| AmpmError::io(&staging, e))?;
            }
            fs::create_dir_all(&staging).map_err(|e| AmpmError::io(&staging, e))?;

            if let Err(e) = fetch(&staging) {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
            fs::rename(&staging, &final_dir).map_err(|e| AmpmError::io(&final_dir, e))?;
        }

        self.publish_side_files(id, meta)?;
        Ok(self.payload_path(id, meta))
    }

    /// Writes `.toml`, `.env`, then `.target`. The `.target` rename comes
    /// last: readers that observe it are guaranteed a complete entry.
    fn publish_side_files(&self, id: &ArtifactId, meta: &ArtifactMetadata) -> Result<()> {
        write_atomic(
            &self.config.record_path(id),
            meta.to_canonical_toml()?.as_bytes(),
        )?;
        write_atomic(
            &self.config.env_path(id),
            self.render_env_file(id, meta).as_bytes(),
        )?;

        let target = self.config.target_path(id);
        let tmp = target.with_file_name(format!("{}.target.tmp", id.fingerprint));
        let _ = fs::remove_file(&tmp);
        std::os::unix::fs::symlink(self.payload_path(id, meta), &tmp)
            .map_err(|e| AmpmError::io(&tmp, e))?;
        fs::rename(&tmp, &target).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            AmpmError::io(&target, e)
        })
    }

    /// Renders the export script for a record. Pure text: sourcing it only
    /// sets variables. `${BASE_DIR}` in values expands to the payload path.
    pub fn render_env_file(&self, id: &ArtifactId, meta: &ArtifactMetadata) -> String {
        let base_dir = self.payload_path(id, meta).display().to_string();
        let mut script = String::new();
        for (key, value) in &meta.env {
            let value = value.replace("${BASE_DIR}", &base_dir);
            script.push_str("export ");
            script.push_str(key);
            script.push('=');
            script.push_str(&shell_quote(&value));
            script.push('\n');
        }
        script
    }
}

/// POSIX single-quoting; embedded quotes become `'\''`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::repo::tests::sample_record;

    fn store(root: &Path) -> LocalStore {
        LocalStore::new(&Config::with(root, None))
    }

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn env_rendering_substitutes_base_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let local = store(tmp.path());
        let mut meta = sample_record("foobar", "hello.txt");
        meta.env = BTreeMap::from([
            ("HELLO".to_string(), "world's".to_string()),
            ("HELLO_PATH".to_string(), "${BASE_DIR}".to_string()),
        ]);
        let id = meta.id().unwrap();

        let script = local.render_env_file(&id, &meta);
        let payload = local.payload_path(&id, &meta);
        assert_eq!(
            script,
            format!(
                "export HELLO='world'\\''s'\nexport HELLO_PATH='{}'\n",
                payload.display()
            )
        );
    }

    #[test]
    fn ensure_local_materializes_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let local = store(tmp.path());
        let meta = sample_record("foobar", "hello.txt");
        let id = meta.id().unwrap();

        let fetches = AtomicUsize::new(0);
        let fetch = |staging: &Path| {
            fetches.fetch_add(1, Ordering::SeqCst);
            fs::write(staging.join("hello.txt"), b"hi").map_err(|e| AmpmError::io(staging, e))
        };

        let path = local.ensure_local(&id, &meta, fetch).unwrap();
        assert_eq!(path, local.payload_path(&id, &meta));
        assert_eq!(fs::read(&path).unwrap(), b"hi");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // The published .target carries the payload path as its link text.
        let link = fs::read_link(local.config().target_path(&id)).unwrap();
        assert_eq!(link, path);
        // The .env and .toml side-files exist.
        assert!(local.config().env_path(&id).exists());
        assert!(local.config().record_path(&id).exists());

        // Second call is a pure cache hit.
        let again = local
            .ensure_local(&id, &meta, |_| panic!("must not refetch"))
            .unwrap();
        assert_eq!(again, path);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_fetch_leaves_no_trace() {
        let tmp = tempfile::TempDir::new().unwrap();
        let local = store(tmp.path());
        let meta = sample_record("foobar", "hello.txt");
        let id = meta.id().unwrap();

        let err = local
            .ensure_local(&id, &meta, |_| {
                Err(AmpmError::Connect("share went away".into()))
            })
            .unwrap_err();
        assert!(matches!(err, AmpmError::Connect(_)));
        assert!(!local.config().artifact_staging_dir(&id).exists());
        assert!(!local.config().artifact_dir(&id).exists());
        assert!(local.cached_target(&id).is_none());

        // A later fetch succeeds cleanly.
        local
            .ensure_local(&id, &meta, |staging| {
                fs::write(staging.join("hello.txt"), b"ok")
                    .map_err(|e| AmpmError::io(staging, e))
            })
            .unwrap();
        assert!(local.cached_target(&id).is_some());
    }

    #[test]
    fn broken_target_is_refetched() {
        let tmp = tempfile::TempDir::new().unwrap();
        let local = store(tmp.path());
        let meta = sample_record("foobar", "hello.txt");
        let id = meta.id().unwrap();

        // A .target pointing at a path that no longer exists is a miss.
        let target = local.config().target_path(&id);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink("/nonexistent/payload", &target).unwrap();
        assert!(local.cached_target(&id).is_none());

        let path = local
            .ensure_local(&id, &meta, |staging| {
                fs::write(staging.join("hello.txt"), b"fresh")
                    .map_err(|e| AmpmError::io(staging, e))
            })
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"fresh");
    }
}
