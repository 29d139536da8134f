use std::fmt;
use std::str::FromStr;

use crate::error::{AmpmError, Result};

/// The external handle for one artifact: `<type>:<fingerprint>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId {
    pub artifact_type: String,
    pub fingerprint: String,
}

/// 32 lowercase base32 characters. Queries only promise `[a-z0-9]{32}`.
pub fn is_fingerprint(s: &str) -> bool {
    s.len() == 32
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Artifact types are slash-delimited namespace paths. They must not collide
/// with the identifier syntax or escape the metadata tree.
pub fn validate_type(artifact_type: &str) -> Result<()> {
    if artifact_type.is_empty() {
        return Err(AmpmError::InvalidInput("artifact type is empty".into()));
    }
    if artifact_type.contains(':') {
        return Err(AmpmError::InvalidInput(format!(
            "artifact type cannot contain \":\": {artifact_type}"
        )));
    }
    if artifact_type.contains("/.") {
        return Err(AmpmError::InvalidInput(format!(
            "artifact type cannot contain \"/.\": {artifact_type}"
        )));
    }
    if artifact_type.starts_with('.') {
        return Err(AmpmError::InvalidInput(format!(
            "artifact type cannot start with \".\": {artifact_type}"
        )));
    }
    Ok(())
}

/// Attribute names and values supplied at upload time must not collide with
/// the `@`-expression namespace reserved for queries.
pub fn validate_attributes<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<()> {
    for (key, value) in pairs {
        for part in [key, value] {
            if part.starts_with('@') {
                return Err(AmpmError::InvalidInput(format!(
                    "attribute cannot start with \"@\": {part}"
                )));
            }
        }
    }
    Ok(())
}

impl ArtifactId {
    pub fn new(artifact_type: impl Into<String>, fingerprint: impl Into<String>) -> Result<Self> {
        // Types are lowercase namespace paths; accept any case on input.
        let id = Self {
            artifact_type: artifact_type.into().to_lowercase(),
            fingerprint: fingerprint.into(),
        };
        validate_type(&id.artifact_type)?;
        if !is_fingerprint(&id.fingerprint) {
            return Err(AmpmError::InvalidInput(format!(
                "invalid artifact fingerprint: {}",
                id.fingerprint
            )));
        }
        Ok(id)
    }
}

impl FromStr for ArtifactId {
    type Err = AmpmError;

    fn from_str(s: &str) -> Result<Self> {
        let (artifact_type, fingerprint) = s
            .split_once(':')
            .ok_or_else(|| AmpmError::InvalidInput(format!("invalid artifact identifier: {s}")))?;
        Self::new(artifact_type, fingerprint)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.artifact_type, self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: &str = "mbf5qxqli76zx7btc5n7fkq47tjs6cl2";

    #[test]
    fn parses_and_displays() {
        let id: ArtifactId = format!("foo/bar:{FP}").parse().unwrap();
        assert_eq!(id.artifact_type, "foo/bar");
        assert_eq!(id.fingerprint, FP);
        assert_eq!(id.to_string(), format!("foo/bar:{FP}"));
    }

    #[test]
    fn rejects_bad_identifiers() {
        assert!("no-colon".parse::<ArtifactId>().is_err());
        assert!("foo:short".parse::<ArtifactId>().is_err());
        assert!(format!("foo:{}", FP.to_uppercase())
            .parse::<ArtifactId>()
            .is_err());
        assert!(format!(":{FP}").parse::<ArtifactId>().is_err());
    }

    #[test]
    fn type_validation() {
        assert!(validate_type("foo/bar").is_ok());
        assert!(validate_type("foo:bar").is_err());
        assert!(validate_type(".hidden").is_err());
        assert!(validate_type("foo/.hidden").is_err());
        assert!(validate_type("").is_err());
    }

    #[test]
    fn attribute_validation() {
        assert!(validate_attributes([("arch", "x86_64")]).is_ok());
        assert!(validate_attributes([("@any", "x")]).is_err());
        assert!(validate_attributes([("arch", "@ignore")]).is_err());
    }
}
