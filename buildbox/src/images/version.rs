//! Ordered OS release versions.

use std::fmt;
use std::str::FromStr;

use buildbox_shared::errors::BuildboxError;

/// `major.minor` release version, e.g. `20.04`.
///
/// Compared numerically field by field, never as a float.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
}

impl OsVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for OsVersion {
    /// Canonical form with a zero-padded minor: `16.04`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

impl FromStr for OsVersion {
    type Err = BuildboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BuildboxError::Parse(format!("Invalid OS version '{}'", s));

        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        let major = major.parse::<u32>().map_err(|_| invalid())?;
        let minor = minor.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self { major, minor })
    }
}
