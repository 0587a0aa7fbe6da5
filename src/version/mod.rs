// src/version/mod.rs

//! Version handling for Ingot
//!
//! This module provides:
//! - A lenient semantic version type (partial versions like "1.2" are padded)
//! - Range expressions with comparison, tilde and compatible-release operators
//! - Range resolution against ordered candidate sets

pub mod range;

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

pub use range::{VersionRange, resolve, validate};

/// A semantic version
///
/// Wraps `semver::Version` with lenient parsing: recipes in the wild often
/// declare partial versions ("1", "1.2"), which are padded with zeros. The
/// display form is always the canonical full triple, so "1.2" round-trips
/// as "1.2.0".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(semver::Version);

impl Version {
    /// Create a version from explicit components
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version(semver::Version::new(major, minor, patch))
    }

    /// Parse a version string, padding partial versions with zeros
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(Error::InvalidVersion(input.to_string()));
        }

        // Split the numeric core from any pre-release/build suffix so that
        // "1.2-beta" pads to "1.2.0-beta"
        let (core, suffix) = match s.find(['-', '+']) {
            Some(idx) if idx > 0 => (&s[..idx], &s[idx..]),
            _ => (s, ""),
        };

        let padded = match core.chars().filter(|c| *c == '.').count() {
            0 => format!("{}.0.0{}", core, suffix),
            1 => format!("{}.0{}", core, suffix),
            _ => format!("{}{}", core, suffix),
        };

        semver::Version::parse(&padded)
            .map(Version)
            .map_err(|_| Error::InvalidVersion(input.to_string()))
    }

    /// Major version component
    pub fn major(&self) -> u64 {
        self.0.major
    }

    /// Minor version component
    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    /// Patch version component
    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// True if this version carries a pre-release component
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// Access the wrapped semver version
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl From<semver::Version> for Version {
    fn from(v: semver::Version) -> Self {
        Version(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_version() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v.major(), 1);
        assert_eq!(v.minor(), 2);
        assert_eq!(v.patch(), 3);
    }

    #[test]
    fn test_parse_partial_versions_are_padded() {
        assert_eq!(Version::parse("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(Version::parse("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(Version::parse("1.2").unwrap().to_string(), "1.2.0");
    }

    #[test]
    fn test_parse_prerelease_on_partial_core() {
        let v = Version::parse("2.0-beta.1").unwrap();
        assert_eq!(v.major(), 2);
        assert!(v.is_prerelease());
        assert_eq!(v.to_string(), "2.0.0-beta.1");
    }

    #[test]
    fn test_parse_invalid_versions() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("not-a-version").is_err());
        assert!(Version::parse("1.2.3.4").is_err());
        assert!(matches!(
            Version::parse("abc").unwrap_err(),
            Error::InvalidVersion(_)
        ));
    }

    #[test]
    fn test_ordering() {
        let older = Version::parse("1.2.3").unwrap();
        let newer = Version::parse("1.10.0").unwrap();
        assert!(older < newer);

        // Pre-releases sort before the release they precede
        let pre = Version::parse("2.0.0-rc.1").unwrap();
        let rel = Version::parse("2.0.0").unwrap();
        assert!(pre < rel);
    }

    #[test]
    fn test_from_str_round_trip() {
        let v: Version = "3.1.4".parse().unwrap();
        assert_eq!(v.to_string(), "3.1.4");
    }
}
