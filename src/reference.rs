// src/reference.rs

//! Package references
//!
//! A reference identifies a recipe: `name/version`, optionally followed by
//! `@user/channel` ownership and a `#revision` pin. Requirements are written
//! as reference specs, where the version slot may hold a range expression in
//! brackets (`zlib/[>=1.2 <2.0]`) instead of a concrete version.

use crate::error::{Error, Result};
use crate::version::Version;
use std::fmt;
use std::str::FromStr;

/// A fully resolved package reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub name: String,
    pub version: Version,
    pub user: Option<String>,
    pub channel: Option<String>,
    /// Recipe revision, when pinned
    pub revision: Option<String>,
}

impl Reference {
    pub fn new(name: &str, version: Version) -> Self {
        Reference {
            name: name.to_string(),
            version,
            user: None,
            channel: None,
            revision: None,
        }
    }

    pub fn with_user_channel(mut self, user: &str, channel: &str) -> Self {
        self.user = Some(user.to_string());
        self.channel = Some(channel.to_string());
        self
    }

    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = Some(revision.to_string());
        self
    }

    /// The reference without its revision pin
    pub fn without_revision(&self) -> Reference {
        Reference {
            revision: None,
            ..self.clone()
        }
    }

    /// True if both sides belong to the same user/channel namespace
    pub fn same_owner(&self, other: &Reference) -> bool {
        self.user == other.user && self.channel == other.channel
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let (Some(user), Some(channel)) = (&self.user, &self.channel) {
            write!(f, "@{}/{}", user, channel)?;
        }
        if let Some(revision) = &self.revision {
            write!(f, "#{}", revision)?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let spec: RefSpec = s.parse()?;
        match spec.version {
            VersionSpec::Exact(version) => Ok(Reference {
                name: spec.name,
                version,
                user: spec.user,
                channel: spec.channel,
                revision: spec.revision,
            }),
            VersionSpec::Range(_) => Err(Error::InvalidReference(s.to_string())),
        }
    }
}

/// The version slot of a requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Exact(Version),
    /// A range expression to resolve against available versions
    Range(String),
}

impl VersionSpec {
    pub fn is_range(&self) -> bool {
        matches!(self, VersionSpec::Range(_))
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Exact(v) => v.fmt(f),
            VersionSpec::Range(expr) => write!(f, "[{}]", expr),
        }
    }
}

/// A requirement target before version resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    pub name: String,
    pub version: VersionSpec,
    pub user: Option<String>,
    pub channel: Option<String>,
    pub revision: Option<String>,
}

impl RefSpec {
    pub fn exact(name: &str, version: Version) -> Self {
        RefSpec {
            name: name.to_string(),
            version: VersionSpec::Exact(version),
            user: None,
            channel: None,
            revision: None,
        }
    }

    pub fn range(name: &str, expression: &str) -> Self {
        RefSpec {
            name: name.to_string(),
            version: VersionSpec::Range(expression.to_string()),
            user: None,
            channel: None,
            revision: None,
        }
    }

    /// Bind the spec to a concrete version
    pub fn to_reference(&self, version: Version) -> Reference {
        Reference {
            name: self.name.clone(),
            version,
            user: self.user.clone(),
            channel: self.channel.clone(),
            revision: self.revision.clone(),
        }
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let (Some(user), Some(channel)) = (&self.user, &self.channel) {
            write!(f, "@{}/{}", user, channel)?;
        }
        if let Some(revision) = &self.revision {
            write!(f, "#{}", revision)?;
        }
        Ok(())
    }
}

impl FromStr for RefSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        let invalid = || Error::InvalidReference(s.to_string());

        let (body, revision) = match input.rsplit_once('#') {
            Some((body, rev)) if !rev.is_empty() => (body, Some(rev.to_string())),
            Some(_) => return Err(invalid()),
            None => (input, None),
        };

        let (path, owner) = match body.split_once('@') {
            Some((path, owner)) => (path, Some(owner)),
            None => (body, None),
        };

        let (user, channel) = match owner {
            Some(owner) => {
                let (user, channel) = owner.split_once('/').ok_or_else(invalid)?;
                if user.is_empty() || channel.is_empty() {
                    return Err(invalid());
                }
                (Some(user.to_string()), Some(channel.to_string()))
            }
            None => (None, None),
        };

        let (name, version_text) = path.split_once('/').ok_or_else(invalid)?;
        if name.is_empty() || version_text.is_empty() {
            return Err(invalid());
        }

        let version = parse_version_spec(version_text, s)?;

        Ok(RefSpec {
            name: name.to_string(),
            version,
            user,
            channel,
            revision,
        })
    }
}

fn parse_version_spec(text: &str, original: &str) -> Result<VersionSpec> {
    if let Some(inner) = text.strip_prefix('[') {
        let expr = inner
            .strip_suffix(']')
            .ok_or_else(|| Error::InvalidReference(original.to_string()))?;
        if expr.trim().is_empty() {
            return Err(Error::InvalidReference(original.to_string()));
        }
        return Ok(VersionSpec::Range(expr.trim().to_string()));
    }
    if looks_like_range(text) {
        return Ok(VersionSpec::Range(text.trim().to_string()));
    }
    Ok(VersionSpec::Exact(Version::parse(text)?))
}

fn looks_like_range(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '>' | '<' | '~' | '|' | ',') || c.is_whitespace())
        || text.starts_with('=')
}
