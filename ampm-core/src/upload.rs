use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use ampm_common::model::{
    validate_attributes, validate_type, ArtifactId, ArtifactMetadata, Compression, PathType,
};
use ampm_common::{AmpmError, Result};
use chrono::{SubsecRound, Utc};
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::repo::RemoteRepo;

const PACK_LEVEL: u32 = 6;

#[derive(Debug, Default)]
pub struct UploadRequest {
    /// Payload to upload. When absent, `remote_path` must name a payload
    /// that is already on the share.
    pub local_path: Option<PathBuf>,
    pub artifact_type: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Explicit payload location within the share; recorded in the metadata.
    pub remote_path: Option<String>,
    /// Pack the payload (`gzip` for files, `tar+gzip` for directories).
    pub compressed: bool,
    pub attributes: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

enum Payload {
    /// A packed temp file, deleted when dropped.
    Packed(NamedTempFile),
    /// The caller's file or directory, uploaded as-is.
    Verbatim(PathBuf),
    /// Nothing to copy; the payload is already on the share.
    InPlace,
}

impl Payload {
    fn path(&self) -> Option<&Path> {
        match self {
            Payload::Packed(tmp) => Some(tmp.path()),
            Payload::Verbatim(path) => Some(path),
            Payload::InPlace => None,
        }
    }
}

/// Builds the record, packs the payload if requested, and publishes both.
/// Publication is idempotent: re-uploading identical content succeeds
/// without duplicating remote state.
pub fn upload(
    remote: &RemoteRepo,
    request: UploadRequest,
) -> Result<(ArtifactId, ArtifactMetadata)> {
    validate_type(&request.artifact_type)?;
    validate_attributes(
        request
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str())),
    )?;
    let artifact_type = request.artifact_type.trim_matches('/').to_lowercase();

    let (path_type, compression, name, payload) = classify(remote, &request)?;

    let meta = ArtifactMetadata {
        artifact_type,
        name,
        description: request.description.unwrap_or_default(),
        path_type,
        remote_path: request.remote_path.clone(),
        compression,
        attributes: request.attributes,
        env: request.env,
        pubdate: Utc::now().trunc_subsecs(0),
    };
    let id = meta.id()?;

    let published = remote.publish(&meta, payload.path())?;
    if published {
        info!("Published {id}");
    } else {
        debug!("{id} was already published, nothing to do");
    }
    Ok((id, meta))
}

/// Decides path type, compression, name and payload source from the inputs.
fn classify(
    remote: &RemoteRepo,
    request: &UploadRequest,
) -> Result<(PathType, Compression, String, Payload)> {
    if let Some(src) = &request.local_path {
        let file_name = src
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                AmpmError::InvalidInput(format!("cannot derive a name from {}", src.display()))
            })?;
        let name = request.name.clone().unwrap_or(file_name);

        return if src.is_dir() {
            if request.compressed {
                Ok((
                    PathType::Dir,
                    Compression::TarGzip,
                    name,
                    Payload::Packed(pack_tar_gz(src)?),
                ))
            } else {
                Ok((
                    PathType::Dir,
                    Compression::None,
                    name,
                    Payload::Verbatim(src.clone()),
                ))
            }
        } else if src.is_file() {
            if request.compressed {
                Ok((
                    PathType::File,
                    Compression::Gzip,
                    name,
                    Payload::Packed(pack_gz(src)?),
                ))
            } else {
                Ok((
                    PathType::File,
                    Compression::None,
                    name,
                    Payload::Verbatim(src.clone()),
                ))
            }
        } else {
            Err(AmpmError::InvalidInput(format!(
                "unsupported payload type: {}",
                src.display()
            )))
        };
    }

    // No local payload: register something already on the share.
    let remote_path = request.remote_path.as_deref().ok_or_else(|| {
        AmpmError::InvalidInput("must specify either a local path or --remote-path".into())
    })?;
    let last = remote_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(remote_path)
        .to_string();

    if request.compressed {
        if let Some(stem) = last.strip_suffix(".tar.gz") {
            let name = request.name.clone().unwrap_or_else(|| stem.to_string());
            Ok((PathType::Dir, Compression::TarGzip, name, Payload::InPlace))
        } else if let Some(stem) = last.strip_suffix(".gz") {
            let name = request.name.clone().unwrap_or_else(|| stem.to_string());
            Ok((PathType::File, Compression::Gzip, name, Payload::InPlace))
        } else {
            Err(AmpmError::InvalidInput(format!(
                "remote artifact is not compressed with a known method (.tar.gz or .gz): \
                 {remote_path}; try --uncompressed to register it as-is"
            )))
        }
    } else {
        let name = request.name.clone().unwrap_or(last);
        let on_share = remote.root().join(remote_path.trim_start_matches('/'));
        let path_type = if on_share.is_dir() {
            PathType::Dir
        } else {
            PathType::File
        };
        Ok((path_type, Compression::None, name, Payload::InPlace))
    }
}

fn pack_gz(src: &Path) -> Result<NamedTempFile> {
    let tmp = NamedTempFile::new().map_err(|e| AmpmError::io(std::env::temp_dir(), e))?;
    debug!("Compressing {} -> {}", src.display(), tmp.path().display());

    let mut input = File::open(src).map_err(|e| AmpmError::io(src, e))?;
    let out = tmp.reopen().map_err(|e| AmpmError::io(tmp.path(), e))?;
    let mut encoder = GzEncoder::new(out, flate2::Compression::new(PACK_LEVEL));
    io::copy(&mut input, &mut encoder).map_err(|e| AmpmError::io(src, e))?;
    encoder.finish().map_err(|e| AmpmError::io(tmp.path(), e))?;
    Ok(tmp)
}

fn pack_tar_gz(src: &Path) -> Result<NamedTempFile> {
    let tmp = NamedTempFile::new().map_err(|e| AmpmError::io(std::env::temp_dir(), e))?;
    debug!("Packing {} -> {}", src.display(), tmp.path().display());

    let out = tmp.reopen().map_err(|e| AmpmError::io(tmp.path(), e))?;
    let encoder = GzEncoder::new(out, flate2::Compression::new(PACK_LEVEL));
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", src)
        .map_err(|e| AmpmError::io(src, e))?;
    let encoder = builder
        .into_inner()
        .map_err(|e| AmpmError::io(src, e))?;
    encoder.finish().map_err(|e| AmpmError::io(tmp.path(), e))?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use flate2::read::GzDecoder;

    #[test]
    fn gz_pack_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("data.bin");
        fs::write(&src, b"some payload bytes").unwrap();

        let packed = pack_gz(&src).unwrap();
        let mut decoder = GzDecoder::new(File::open(packed.path()).unwrap());
        let mut out = Vec::new();
        io::Read::read_to_end(&mut decoder, &mut out).unwrap();
        assert_eq!(out, b"some payload bytes");
    }

    #[test]
    fn tar_gz_pack_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("tree");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("top.txt"), b"top").unwrap();
        fs::write(src.join("sub/inner.txt"), b"inner").unwrap();

        let packed = pack_tar_gz(&src).unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(packed.path()).unwrap()));
        archive.unpack(&out).unwrap();
        assert_eq!(fs::read(out.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(out.join("sub/inner.txt")).unwrap(), b"inner");
    }
}
