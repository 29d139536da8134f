use std::path::PathBuf;

use ampm_common::model::{ArtifactId, ArtifactMetadata};
use ampm_common::{AmpmError, Config, Result};
use tracing::debug;

use crate::query::{self, Query};
use crate::repo::{LocalStore, RemoteRepo};
use crate::upload::{self, UploadRequest};

/// Composes the query engine, the local cache and the remote gateway.
///
/// Exact `type:fingerprint` inputs skip the query engine entirely. Non-exact
/// queries mirror the remote metadata for the type first and run against the
/// local mirror; in offline mode the mirror is all there is.
pub struct Resolver {
    config: Config,
    local: LocalStore,
}

impl Resolver {
    pub fn new(config: Config) -> Self {
        let local = LocalStore::new(&config);
        Self { config, local }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    fn remote(&self) -> Result<RemoteRepo> {
        RemoteRepo::open(self.config.repo_uri()?)
    }

    /// Resolves an identifier-or-query to exactly one record.
    pub fn resolve(
        &self,
        identifier: &str,
        attrs: &[(String, String)],
    ) -> Result<(ArtifactId, ArtifactMetadata)> {
        if identifier.contains(':') {
            let id: ArtifactId = identifier.parse()?;
            let meta = self.lookup_exact(&id)?;
            return Ok((id, meta));
        }
        let query = Query::new(identifier, attrs)?;
        let candidates = self.query_candidates(&query)?;
        query::select_single(&query, candidates)
    }

    fn lookup_exact(&self, id: &ArtifactId) -> Result<ArtifactMetadata> {
        if let Some(meta) = self.local.load_record(id)? {
            return Ok(meta);
        }
        if self.config.offline() {
            return Err(AmpmError::OfflineMiss(id.to_string()));
        }
        debug!("{id} not cached, fetching record from the remote");
        let meta = self.remote()?.fetch_record(id)?;
        self.local
            .store_record_bytes(id, meta.to_canonical_toml()?.as_bytes())?;
        Ok(meta)
    }

    fn query_candidates(&self, query: &Query) -> Result<Vec<(ArtifactId, ArtifactMetadata)>> {
        if !self.config.offline() {
            self.remote()?.sync_metadata(&query.type_prefix, &self.local)?;
        }
        self.local.scan(&query.type_prefix)
    }

    /// `get`: resolve, materialize, return the payload path.
    pub fn get(&self, identifier: &str, attrs: &[(String, String)]) -> Result<PathBuf> {
        let (id, meta) = self.resolve(identifier, attrs)?;
        if self.config.offline() {
            return self
                .local
                .cached_target(&id)
                .ok_or_else(|| AmpmError::OfflineMiss(id.to_string()));
        }
        self.local.ensure_local(&id, &meta, |staging| {
            self.remote()?.fetch_payload(&meta, staging)
        })
    }

    /// `env`: resolve, materialize, return the export script.
    pub fn env_script(&self, identifier: &str, attrs: &[(String, String)]) -> Result<String> {
        let (id, meta) = self.resolve(identifier, attrs)?;
        if self.local.cached_target(&id).is_some() {
            return self.local.env_script(&id);
        }
        if self.config.offline() {
            return Err(AmpmError::OfflineMiss(id.to_string()));
        }
        self.local.ensure_local(&id, &meta, |staging| {
            self.remote()?.fetch_payload(&meta, staging)
        })?;
        self.local.env_script(&id)
    }

    /// `list`: the filter step only, no uniqueness or selection.
    pub fn list(
        &self,
        identifier: &str,
        attrs: &[(String, String)],
    ) -> Result<Vec<(ArtifactId, ArtifactMetadata)>> {
        if identifier.contains(':') {
            let id: ArtifactId = identifier.parse()?;
            let meta = self.lookup_exact(&id)?;
            return Ok(vec![(id, meta)]);
        }
        let query = Query::new(identifier, attrs)?;
        let candidates = self.query_candidates(&query)?;
        Ok(query::filter(&query, candidates))
    }

    /// `upload`: pack and publish through the remote gateway.
    pub fn upload(&self, request: UploadRequest) -> Result<(ArtifactId, ArtifactMetadata)> {
        upload::upload(&self.remote()?, request)
    }

    /// `remote-rm`: exact-fingerprint removal on the remote.
    pub fn remote_rm(&self, identifier: &str) -> Result<()> {
        let id: ArtifactId = identifier.parse()?;
        self.remote()?.remove(&id)
    }
}
