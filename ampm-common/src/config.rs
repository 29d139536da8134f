use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{AmpmError, Result};
use crate::model::ArtifactId;

/// Default local cache root, overridable with `AMPM_CACHE_DIR`.
pub const DEFAULT_CACHE_DIR: &str = "/var/ampm";

/// Well-known file holding the remote repository URI, one line.
pub const REPO_URI_FILE: &str = "/opt/ampm/repo_uri";

/// Installer-managed update script run by `ampm update`.
pub const UPDATE_SCRIPT: &str = "/opt/ampm/update.sh";

pub const DEFAULT_REPO_URI: &str = "nfs://127.0.0.1/mnt/myshareddir#ampm";

#[derive(Debug, Clone)]
pub struct Config {
    cache_root: PathBuf,
    repo_uri: Option<String>,
    offline: bool,
}

impl Config {
    /// Resolves configuration from the environment. URI precedence:
    /// `--server` override, then `AMPM_SERVER`, then the `repo_uri` file,
    /// then the built-in default. Offline mode carries no URI at all.
    pub fn load(server_override: Option<String>, offline: bool) -> Result<Self> {
        let cache_root = Self::cache_root_from_env();

        let repo_uri = if offline {
            None
        } else if let Some(uri) = server_override {
            debug!("Using repo URI from --server: {uri}");
            Some(uri)
        } else if let Ok(uri) = env::var("AMPM_SERVER") {
            debug!("Using repo URI from AMPM_SERVER: {uri}");
            Some(uri)
        } else {
            match fs::read_to_string(REPO_URI_FILE) {
                Ok(contents) => {
                    let uri = contents.trim().to_string();
                    if uri.is_empty() {
                        return Err(AmpmError::Config(format!("{REPO_URI_FILE} is empty")));
                    }
                    debug!("Using repo URI from {REPO_URI_FILE}: {uri}");
                    Some(uri)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("No {REPO_URI_FILE}, falling back to default repo URI");
                    Some(DEFAULT_REPO_URI.to_string())
                }
                Err(e) => return Err(AmpmError::io(REPO_URI_FILE, e)),
            }
        };

        Ok(Self {
            cache_root,
            repo_uri,
            offline,
        })
    }

    /// Builds a configuration directly, bypassing the environment. Offline
    /// mode is implied by the absence of a repo URI.
    pub fn with(cache_root: impl Into<PathBuf>, repo_uri: Option<String>) -> Self {
        let offline = repo_uri.is_none();
        Self {
            cache_root: cache_root.into(),
            repo_uri,
            offline,
        }
    }

    /// Cache root without touching the rest of the configuration. The
    /// fast-path launcher uses this directly so a `get type:fp` never reads
    /// the repo URI file.
    pub fn cache_root_from_env() -> PathBuf {
        env::var_os("AMPM_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR))
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn offline(&self) -> bool {
        self.offline
    }

    /// The configured remote URI. `Config` in offline mode has none.
    pub fn repo_uri(&self) -> Result<&str> {
        self.repo_uri
            .as_deref()
            .ok_or_else(|| AmpmError::OfflineMiss("no remote repository in offline mode".into()))
    }

    // --- Local cache layout ---

    pub fn metadata_root(&self) -> PathBuf {
        self.cache_root.join("metadata")
    }

    pub fn artifacts_root(&self) -> PathBuf {
        self.cache_root.join("artifacts")
    }

    fn metadata_file(&self, id: &ArtifactId, ext: &str) -> PathBuf {
        self.metadata_root()
            .join(&id.artifact_type)
            .join(format!("{}.{ext}", id.fingerprint))
    }

    /// `metadata/<type>/<fp>.toml`
    pub fn record_path(&self, id: &ArtifactId) -> PathBuf {
        self.metadata_file(id, "toml")
    }

    /// `metadata/<type>/<fp>.target` — symlink whose text is the payload path.
    pub fn target_path(&self, id: &ArtifactId) -> PathBuf {
        self.metadata_file(id, "target")
    }

    /// `metadata/<type>/<fp>.env` — rendered export script.
    pub fn env_path(&self, id: &ArtifactId) -> PathBuf {
        self.metadata_file(id, "env")
    }

    /// `artifacts/<type>/<fp>/` — the materialized payload directory.
    pub fn artifact_dir(&self, id: &ArtifactId) -> PathBuf {
        self.artifacts_root()
            .join(&id.artifact_type)
            .join(&id.fingerprint)
    }

    /// Staging directory used while a payload is being fetched.
    pub fn artifact_staging_dir(&self, id: &ArtifactId) -> PathBuf {
        self.artifacts_root()
            .join(&id.artifact_type)
            .join(format!("{}.partial", id.fingerprint))
    }

    /// `locks/<type>/<fp>.lock` — serializes fetches of one fingerprint.
    pub fn lock_path(&self, id: &ArtifactId) -> PathBuf {
        self.cache_root
            .join("locks")
            .join(&id.artifact_type)
            .join(format!("{}.lock", id.fingerprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_layout_paths() {
        let config = Config {
            cache_root: PathBuf::from("/var/ampm"),
            repo_uri: None,
            offline: true,
        };
        let id: ArtifactId = "foo/bar:mbf5qxqli76zx7btc5n7fkq47tjs6cl2".parse().unwrap();

        assert_eq!(
            config.record_path(&id),
            PathBuf::from("/var/ampm/metadata/foo/bar/mbf5qxqli76zx7btc5n7fkq47tjs6cl2.toml")
        );
        assert_eq!(
            config.target_path(&id),
            PathBuf::from("/var/ampm/metadata/foo/bar/mbf5qxqli76zx7btc5n7fkq47tjs6cl2.target")
        );
        assert_eq!(
            config.artifact_dir(&id),
            PathBuf::from("/var/ampm/artifacts/foo/bar/mbf5qxqli76zx7btc5n7fkq47tjs6cl2")
        );
        assert_eq!(
            config.lock_path(&id),
            PathBuf::from("/var/ampm/locks/foo/bar/mbf5qxqli76zx7btc5n7fkq47tjs6cl2.lock")
        );
    }

    #[test]
    fn offline_config_has_no_uri() {
        let config = Config::load(Some("file:///tmp/repo".into()), true).unwrap();
        assert!(config.repo_uri().is_err());
        assert!(config.offline());
    }
}
