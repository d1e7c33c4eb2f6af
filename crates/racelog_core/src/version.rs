//! Version tags of the recording software.
//!
//! Archived events carry tags such as `0.6.1` or `v0.4`. Ordering follows
//! semantic versioning; a leading `v` is ignored and missing minor/patch
//! components count as zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semantic version of the software that recorded an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceVersion(semver::Version);

impl SourceVersion {
    /// Create a new version
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parse from string
    ///
    /// # Errors
    ///
    /// Returns error if format is invalid
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let trimmed = s.trim();
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if bare.is_empty() {
            return Err(VersionError::InvalidFormat(s.to_string()));
        }

        // Pad the core to three components, keeping any pre-release/build suffix
        let split_at = bare.find(['-', '+']).unwrap_or(bare.len());
        let (core, suffix) = bare.split_at(split_at);
        let components = core.split('.').count();
        if components > 3 {
            return Err(VersionError::InvalidFormat(s.to_string()));
        }
        let mut padded = core.to_string();
        for _ in components..3 {
            padded.push_str(".0");
        }
        padded.push_str(suffix);

        semver::Version::parse(&padded)
            .map(Self)
            .map_err(|_| VersionError::InvalidComponent(s.to_string()))
    }

    /// Get the underlying semver value
    #[must_use]
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl fmt::Display for SourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SourceVersion {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceVersion> for String {
    fn from(value: SourceVersion) -> Self {
        value.to_string()
    }
}

/// Version-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Invalid format
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),
    /// Invalid component
    #[error("Invalid version component: {0}")]
    InvalidComponent(String),
}

impl From<VersionError> for crate::error::CoreError {
    fn from(err: VersionError) -> Self {
        Self::InvalidVersion(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let v = SourceVersion::parse("1.2.3").unwrap();
        assert_eq!(v, SourceVersion::new(1, 2, 3));
    }

    #[test]
    fn test_version_v_prefix() {
        assert_eq!(
            SourceVersion::parse("v0.6.0").unwrap(),
            SourceVersion::parse("0.6.0").unwrap()
        );
    }

    #[test]
    fn test_version_padding() {
        assert_eq!(SourceVersion::parse("0.4").unwrap(), SourceVersion::new(0, 4, 0));
        assert_eq!(SourceVersion::parse("v1").unwrap(), SourceVersion::new(1, 0, 0));
    }

    #[test]
    fn test_version_ord() {
        let v1 = SourceVersion::parse("0.4.4").unwrap();
        let v2 = SourceVersion::parse("0.10.0").unwrap();
        let v3 = SourceVersion::parse("1.0.0-beta.1").unwrap();
        let v4 = SourceVersion::parse("1.0.0").unwrap();

        assert!(v1 < v2);
        assert!(v2 < v3);
        assert!(v3 < v4);
    }

    #[test]
    fn test_version_parse_error() {
        assert!(matches!(
            SourceVersion::parse(""),
            Err(VersionError::InvalidFormat(_))
        ));
        assert!(matches!(
            SourceVersion::parse("1.2.3.4"),
            Err(VersionError::InvalidFormat(_))
        ));
        assert!(matches!(
            SourceVersion::parse("a.b.c"),
            Err(VersionError::InvalidComponent(_))
        ));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(SourceVersion::parse("v0.6").unwrap().to_string(), "0.6.0");
    }
}
