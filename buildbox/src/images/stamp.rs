//! Compatibility stamp persisted inside provisioned targets.

use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use serde::{Deserialize, Serialize};

/// Records the image revision a target was provisioned with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompatibilityStamp {
    /// `None` when the document has no usable `revision` field.
    pub revision: Option<String>,
}

#[derive(Deserialize)]
struct RawStamp {
    #[serde(default)]
    revision: Option<serde_yaml::Value>,
}

impl CompatibilityStamp {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: Some(revision.into()),
        }
    }

    pub fn to_yaml(&self) -> BuildboxResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| BuildboxError::Internal(format!("Failed to encode stamp: {}", e)))
    }

    /// Parse a stamp document.
    ///
    /// Scalar revisions are accepted in any YAML form (`revision: 0` and
    /// `revision: '0'` read the same).
    pub fn from_yaml(document: &str) -> BuildboxResult<Self> {
        let raw: RawStamp = serde_yaml::from_str(document)
            .map_err(|e| BuildboxError::Parse(format!("Invalid compatibility stamp: {}", e)))?;

        let revision = match raw.revision {
            Some(serde_yaml::Value::String(s)) => Some(s),
            Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
            Some(serde_yaml::Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        };
        Ok(Self { revision })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_stamp_reads_back() {
        let stamp = CompatibilityStamp::new("0");
        let yaml = stamp.to_yaml().unwrap();
        assert!(yaml.contains("revision"));
        assert_eq!(CompatibilityStamp::from_yaml(&yaml).unwrap(), stamp);
    }

    #[test]
    fn numeric_revision_is_stringified() {
        let stamp = CompatibilityStamp::from_yaml("revision: 3\n").unwrap();
        assert_eq!(stamp.revision.as_deref(), Some("3"));
    }

    #[test]
    fn missing_revision_is_none() {
        let stamp = CompatibilityStamp::from_yaml("other: value\n").unwrap();
        assert_eq!(stamp.revision, None);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = CompatibilityStamp::from_yaml("revision: [unterminated").unwrap_err();
        assert!(matches!(err, BuildboxError::Parse(_)));
    }
}
