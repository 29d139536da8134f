use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AmpmError, Result};
use crate::model::identifier::ArtifactId;

/// Whether the payload is a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    File,
    Dir,
}

/// On-the-wire packing of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "gzip")]
    Gzip,
    #[serde(rename = "tar+gzip")]
    TarGzip,
}

impl PathType {
    pub fn as_str(self) -> &'static str {
        match self {
            PathType::File => "file",
            PathType::Dir => "dir",
        }
    }
}

impl Compression {
    /// Suffix appended to the payload file name on the remote.
    pub fn suffix(self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::TarGzip => ".tar.gz",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::TarGzip => "tar+gzip",
        }
    }
}

/// The canonical descriptor of one artifact. Immutable after publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    pub artifact_type: String,
    pub name: String,
    pub description: String,
    pub path_type: PathType,
    /// Explicit payload location within the remote share. When unset, the
    /// payload lives at the location derived from type, fingerprint, name
    /// and compression; the derived location is never serialized.
    pub remote_path: Option<String>,
    pub compression: Compression,
    pub attributes: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub pubdate: DateTime<Utc>,
}

/// Serialized shape of a record: `[artifact]`, `[attributes]`, `[env]`, in
/// that order, keys lexicographic within each table. Field declaration order
/// here *is* the canonical key order of `[artifact]`.
#[derive(Serialize, Deserialize)]
struct RecordDoc {
    artifact: ArtifactTable,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct ArtifactTable {
    compression: Compression,
    #[serde(default)]
    description: String,
    name: String,
    path_type: PathType,
    /// Omitted in the fingerprint form: the fingerprint names the record's
    /// content, and republishing identical content must be a no-op.
    #[serde(skip_serializing_if = "Option::is_none")]
    pubdate: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_path: Option<String>,
    #[serde(rename = "type")]
    artifact_type: String,
}

/// First 160 bits of SHA-256, base32, lowercased: 32 chars of `[a-z2-7]`.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    BASE32_NOPAD.encode(&digest[..20]).to_ascii_lowercase()
}

impl ArtifactMetadata {
    fn to_doc(&self, with_pubdate: bool) -> RecordDoc {
        RecordDoc {
            artifact: ArtifactTable {
                compression: self.compression,
                description: self.description.clone(),
                name: self.name.clone(),
                path_type: self.path_type,
                pubdate: with_pubdate.then_some(self.pubdate),
                remote_path: self.remote_path.clone(),
                artifact_type: self.artifact_type.clone(),
            },
            attributes: self.attributes.clone(),
            env: self.env.clone(),
        }
    }

    /// The exact bytes stored at `metadata/<type>/<fingerprint>.toml`.
    /// Deterministic: stable section order, sorted keys, no incidental state.
    pub fn to_canonical_toml(&self) -> Result<String> {
        toml::to_string(&self.to_doc(true))
            .map_err(|e| AmpmError::Format(format!("serializing record: {e}")))
    }

    /// Content fingerprint. Computed over the canonical serialization with
    /// `pubdate` left out, so uploading the same content twice yields the
    /// same identifier.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = toml::to_string(&self.to_doc(false))
            .map_err(|e| AmpmError::Format(format!("serializing record: {e}")))?;
        Ok(fingerprint_bytes(bytes.as_bytes()))
    }

    pub fn id(&self) -> Result<ArtifactId> {
        ArtifactId::new(self.artifact_type.clone(), self.fingerprint()?)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| AmpmError::Format("record is not valid UTF-8".into()))?;
        let doc: RecordDoc =
            toml::from_str(text).map_err(|e| AmpmError::Format(e.to_string()))?;
        let pubdate = doc
            .artifact
            .pubdate
            .ok_or_else(|| AmpmError::Format("record is missing artifact.pubdate".into()))?;

        let meta = Self {
            artifact_type: doc.artifact.artifact_type,
            name: doc.artifact.name,
            description: doc.artifact.description,
            path_type: doc.artifact.path_type,
            remote_path: doc.artifact.remote_path,
            compression: doc.artifact.compression,
            attributes: doc.attributes,
            env: doc.env,
            pubdate,
        };
        match (meta.path_type, meta.compression) {
            (PathType::File, Compression::TarGzip) => Err(AmpmError::Format(
                "tar+gzip compression is only valid for directory payloads".into(),
            )),
            (PathType::Dir, Compression::Gzip) => Err(AmpmError::Format(
                "gzip compression is only valid for file payloads".into(),
            )),
            _ => Ok(meta),
        }
    }

    /// Remote directory that holds the payload, relative to the repo root.
    pub fn remote_payload_dir(&self) -> Result<String> {
        Ok(format!(
            "artifacts/{}/{}",
            self.artifact_type,
            self.fingerprint()?
        ))
    }

    /// Full remote payload path relative to the repo root: the explicit
    /// `remote_path` when present, the derived location otherwise.
    pub fn remote_payload_path(&self) -> Result<String> {
        if let Some(location) = &self.remote_path {
            return Ok(location.trim_start_matches('/').to_string());
        }
        Ok(format!(
            "{}/{}{}",
            self.remote_payload_dir()?,
            self.name,
            self.compression.suffix()
        ))
    }

    /// Attribute view used for query matching and display: the explicit
    /// attributes overlaid on the implicit `name`, `description`, `pubdate`
    /// and (when set) `location`.
    pub fn combined_attrs(&self) -> BTreeMap<String, String> {
        let mut combined = BTreeMap::new();
        combined.insert("name".to_string(), self.name.clone());
        combined.insert("description".to_string(), self.description.clone());
        combined.insert("pubdate".to_string(), self.pubdate.to_rfc3339());
        if let Some(location) = &self.remote_path {
            combined.insert("location".to_string(), location.clone());
        }
        for (k, v) in &self.attributes {
            combined.insert(k.clone(), v.clone());
        }
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> ArtifactMetadata {
        ArtifactMetadata {
            artifact_type: "foobar".into(),
            name: "hello.txt".into(),
            description: String::new(),
            path_type: PathType::File,
            remote_path: None,
            compression: Compression::Gzip,
            attributes: BTreeMap::from([
                ("arch".to_string(), "x86_64".to_string()),
                ("version".to_string(), "1.2.3".to_string()),
            ]),
            env: BTreeMap::from([("HELLO_PATH".to_string(), "${BASE_DIR}".to_string())]),
            pubdate: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn canonical_form_is_ordered() {
        let text = sample().to_canonical_toml().unwrap();
        let artifact_at = text.find("[artifact]").unwrap();
        let attrs_at = text.find("[attributes]").unwrap();
        let env_at = text.find("[env]").unwrap();
        assert!(artifact_at < attrs_at && attrs_at < env_at);
        assert!(text.find("compression").unwrap() < text.find("name =").unwrap());
        assert!(text.find("arch").unwrap() < text.find("version").unwrap());
    }

    #[test]
    fn parse_round_trip_is_fingerprint_stable() {
        let meta = sample();
        let serialized = meta.to_canonical_toml().unwrap();
        let reparsed = ArtifactMetadata::parse(serialized.as_bytes()).unwrap();
        assert_eq!(meta, reparsed);
        assert_eq!(meta.fingerprint().unwrap(), reparsed.fingerprint().unwrap());
        assert_eq!(serialized, reparsed.to_canonical_toml().unwrap());
    }

    #[test]
    fn fingerprint_shape() {
        let fp = sample().fingerprint().unwrap();
        assert_eq!(fp.len(), 32);
        assert!(fp
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn fingerprint_tracks_content_not_pubdate() {
        let meta = sample();
        let mut later = meta.clone();
        later.pubdate = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(meta.fingerprint().unwrap(), later.fingerprint().unwrap());

        let mut changed = meta.clone();
        changed
            .attributes
            .insert("arch".to_string(), "i386".to_string());
        assert_ne!(meta.fingerprint().unwrap(), changed.fingerprint().unwrap());

        let mut renamed = meta;
        renamed.name = "other.txt".into();
        assert_ne!(
            renamed.fingerprint().unwrap(),
            changed.fingerprint().unwrap()
        );
    }

    #[test]
    fn remote_paths() {
        let meta = sample();
        let fp = meta.fingerprint().unwrap();
        assert_eq!(
            meta.remote_payload_path().unwrap(),
            format!("artifacts/foobar/{fp}/hello.txt.gz")
        );

        let mut pinned = meta;
        pinned.remote_path = Some("/drops/hello.txt.gz".into());
        assert_eq!(pinned.remote_payload_path().unwrap(), "drops/hello.txt.gz");
    }

    #[test]
    fn rejects_invalid_compression_combo() {
        let mut meta = sample();
        meta.path_type = PathType::Dir;
        meta.compression = Compression::Gzip;
        let text = toml::to_string(&meta.to_doc(true)).unwrap();
        assert!(ArtifactMetadata::parse(text.as_bytes()).is_err());
    }

    #[test]
    fn combined_attrs_overlay() {
        let mut meta = sample();
        meta.attributes
            .insert("name".to_string(), "override".to_string());
        let combined = meta.combined_attrs();
        assert_eq!(combined["name"], "override");
        assert_eq!(combined["arch"], "x86_64");
        assert!(combined.contains_key("pubdate"));
        assert!(!combined.contains_key("location"));
    }
}
