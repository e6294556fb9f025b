//! `/etc/os-release` parsing.

use std::collections::HashMap;

/// Parsed KEY=VALUE pairs of an os-release document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OsRelease {
    fields: HashMap<String, String>,
}

impl OsRelease {
    /// Parse os-release content.
    ///
    /// Blank lines, comments and lines without `=` are skipped. Values lose
    /// one pair of surrounding single or double quotes.
    pub fn parse(content: &str) -> Self {
        let fields = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), unquote(value.trim()).to_string()))
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// `NAME`, e.g. "Ubuntu".
    pub fn name(&self) -> Option<&str> {
        self.get("NAME")
    }

    /// `VERSION_ID`, e.g. "20.04".
    pub fn version_id(&self) -> Option<&str> {
        self.get("VERSION_ID")
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOCAL: &str = r#"NAME="Ubuntu"
VERSION="20.04.1 LTS (Focal Fossa)"
ID=ubuntu
ID_LIKE=debian
PRETTY_NAME="Ubuntu 20.04.1 LTS"
VERSION_ID="20.04"
# comment line
HOME_URL="https://www.ubuntu.com/"

VERSION_CODENAME=focal
"#;

    #[test]
    fn parses_quoted_and_bare_values() {
        let release = OsRelease::parse(FOCAL);
        assert_eq!(release.name(), Some("Ubuntu"));
        assert_eq!(release.version_id(), Some("20.04"));
        assert_eq!(release.get("ID"), Some("ubuntu"));
        assert_eq!(release.get("VERSION_CODENAME"), Some("focal"));
        assert_eq!(release.get("HOME_URL"), Some("https://www.ubuntu.com/"));
    }

    #[test]
    fn missing_fields_are_none() {
        let release = OsRelease::parse("ID=alpine\n");
        assert_eq!(release.name(), None);
        assert_eq!(release.version_id(), None);
    }

    #[test]
    fn value_may_contain_equals_sign() {
        let release = OsRelease::parse("BUG_REPORT_URL='https://x.test/?a=b'");
        assert_eq!(release.get("BUG_REPORT_URL"), Some("https://x.test/?a=b"));
    }
}
