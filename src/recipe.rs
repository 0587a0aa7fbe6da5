// src/recipe.rs

//! Recipe metadata
//!
//! The resolver does not execute recipes; it consumes their declared
//! metadata: requirements with their context and visibility, the settings
//! the package cares about, default options, and provided capabilities.

use crate::error::{Error, Result};
use crate::reference::{RefSpec, Reference};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which machine a package runs on
///
/// Host packages link into the final artifact; build packages are tools
/// executed while building (code generators, compilers, build systems).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Host,
    Build,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Host => "host",
            Context::Build => "build",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Context {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "host" => Ok(Context::Host),
            "build" => Ok(Context::Build),
            _ => Err(Error::InvalidReference(format!("unknown context: {}", s))),
        }
    }
}

/// Whether a dependency's headers and symbols reach consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    /// Implementation detail of the requirer, invisible downstream
    Private,
}

/// How a node reaches one of its dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequireKind {
    Direct,
    Transitive,
    /// Only needed to build and run the requirer's tests
    Test,
}

/// One declared requirement of a recipe
#[derive(Debug, Clone)]
pub struct Requirement {
    pub spec: RefSpec,
    pub context: Context,
    pub kind: RequireKind,
    pub visibility: Visibility,
    /// Overrides the version chosen downstream without introducing an edge
    pub is_override: bool,
    /// Introduces the edge and wins any version conflict it causes
    pub force: bool,
}

impl Requirement {
    fn new(spec: RefSpec, context: Context) -> Self {
        Requirement {
            spec,
            context,
            kind: RequireKind::Direct,
            visibility: Visibility::Public,
            is_override: false,
            force: false,
        }
    }

    /// An ordinary library requirement
    pub fn runtime(spec: RefSpec) -> Self {
        Requirement::new(spec, Context::Host)
    }

    /// A requirement hidden from the requirer's consumers
    pub fn private(spec: RefSpec) -> Self {
        Requirement {
            visibility: Visibility::Private,
            ..Requirement::new(spec, Context::Host)
        }
    }

    /// A tool needed while building, resolved in the build context
    pub fn build(spec: RefSpec) -> Self {
        Requirement::new(spec, Context::Build)
    }

    /// A requirement used only by the package's own tests
    pub fn test_only(spec: RefSpec) -> Self {
        Requirement {
            kind: RequireKind::Test,
            visibility: Visibility::Private,
            ..Requirement::new(spec, Context::Host)
        }
    }

    /// A version override that introduces no dependency of its own
    pub fn override_of(spec: RefSpec) -> Self {
        Requirement {
            is_override: true,
            ..Requirement::new(spec, Context::Host)
        }
    }

    /// A real requirement that also silences conflicts in its favor
    pub fn forced(spec: RefSpec) -> Self {
        Requirement {
            force: true,
            ..Requirement::new(spec, Context::Host)
        }
    }
}

/// Declared metadata of one recipe revision
#[derive(Debug, Clone)]
pub struct RecipeMetadata {
    pub name: String,
    pub version: Version,
    pub user: Option<String>,
    pub channel: Option<String>,
    /// Recipe revision, when known
    pub revision: Option<String>,
    /// Settings that affect this package's binary. Empty means all
    /// profile settings apply.
    pub relevant_settings: Vec<String>,
    pub default_options: BTreeMap<String, String>,
    pub requirements: Vec<Requirement>,
    /// Capability names satisfied by this package, beyond its own name
    pub provides: Vec<String>,
    /// Header-only marker: the binary is identical for every configuration
    pub package_id_clear: bool,
}

impl RecipeMetadata {
    pub fn new(name: &str, version: &str) -> Result<Self> {
        Ok(RecipeMetadata {
            name: name.to_string(),
            version: Version::parse(version)?,
            user: None,
            channel: None,
            revision: None,
            relevant_settings: Vec::new(),
            default_options: BTreeMap::new(),
            requirements: Vec::new(),
            provides: Vec::new(),
            package_id_clear: false,
        })
    }

    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = Some(revision.to_string());
        self
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn with_relevant_settings(mut self, settings: &[&str]) -> Self {
        self.relevant_settings = settings.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_default_option(mut self, key: &str, value: &str) -> Self {
        self.default_options.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_provides(mut self, capability: &str) -> Self {
        self.provides.push(capability.to_string());
        self
    }

    pub fn header_only(mut self) -> Self {
        self.package_id_clear = true;
        self
    }

    /// The reference this metadata describes
    pub fn reference(&self) -> Reference {
        Reference {
            name: self.name.clone(),
            version: self.version.clone(),
            user: self.user.clone(),
            channel: self.channel.clone(),
            revision: self.revision.clone(),
        }
    }
}
