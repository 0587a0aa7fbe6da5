// src/package_id.rs

//! Package identity
//!
//! A package id is the fingerprint of everything that shapes a binary:
//! the settings the recipe declares relevant, the node's resolved options,
//! and a contribution per direct dependency. How much of a dependency
//! enters the hash is governed by its mode: from nothing at all
//! (`excluded`) through name-only (`unrelated`) up to the dependency's own
//! package revision (`package_revision`).
//!
//! Fact lines are assembled in a canonical order (settings, options, then
//! requirements sorted by name) so the hash never depends on traversal or
//! declaration order.

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::providers::{BinaryAvailability, BinaryLocation, CompatibilityProvider};
use crate::recipe::{Context, RequireKind};
use crate::reference::Reference;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How one dependency contributes to its consumer's package id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageIdMode {
    /// Name and full version
    FullVersion,
    /// Name, version and recipe revision
    FullRecipe,
    /// Everything in `FullRecipe` plus the dependency's package id
    FullPackage,
    /// Everything in `FullPackage` plus the built package revision
    PackageRevision,
    /// Name and major version only
    #[default]
    SemVer,
    /// Name only, any version is binary-compatible
    Unrelated,
    /// No contribution at all
    Excluded,
}

impl PackageIdMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageIdMode::FullVersion => "full_version",
            PackageIdMode::FullRecipe => "full_recipe",
            PackageIdMode::FullPackage => "full_package",
            PackageIdMode::PackageRevision => "package_revision",
            PackageIdMode::SemVer => "semver",
            PackageIdMode::Unrelated => "unrelated",
            PackageIdMode::Excluded => "excluded",
        }
    }
}

impl FromStr for PackageIdMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full_version" => Ok(PackageIdMode::FullVersion),
            "full_recipe" => Ok(PackageIdMode::FullRecipe),
            "full_package" => Ok(PackageIdMode::FullPackage),
            "package_revision" => Ok(PackageIdMode::PackageRevision),
            "semver" => Ok(PackageIdMode::SemVer),
            "unrelated" => Ok(PackageIdMode::Unrelated),
            "excluded" => Ok(PackageIdMode::Excluded),
            _ => Err(Error::InvalidReference(format!(
                "unknown package id mode: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for PackageIdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode selection: a global default with per-package exceptions
#[derive(Debug, Clone, Default)]
pub struct ModePolicy {
    pub default_mode: PackageIdMode,
    pub per_package: BTreeMap<String, PackageIdMode>,
}

impl ModePolicy {
    pub fn new(default_mode: PackageIdMode) -> Self {
        ModePolicy {
            default_mode,
            per_package: BTreeMap::new(),
        }
    }

    pub fn with_package(mut self, name: &str, mode: PackageIdMode) -> Self {
        self.per_package.insert(name.to_string(), mode);
        self
    }

    pub fn mode_for(&self, name: &str) -> PackageIdMode {
        self.per_package.get(name).copied().unwrap_or(self.default_mode)
    }
}

/// One dependency's identity facts, pre-rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireFact {
    pub name: String,
    pub version: Version,
    pub user: Option<String>,
    pub channel: Option<String>,
    pub revision: Option<String>,
    pub package_id: Option<String>,
    pub package_revision: Option<String>,
    pub mode: PackageIdMode,
}

impl RequireFact {
    /// The hash contribution for this dependency, or `None` when excluded
    pub fn render(&self) -> Option<String> {
        let owner = match (&self.user, &self.channel) {
            (Some(user), Some(channel)) => format!("@{}/{}", user, channel),
            _ => String::new(),
        };
        match self.mode {
            PackageIdMode::Excluded => None,
            PackageIdMode::Unrelated => Some(self.name.clone()),
            PackageIdMode::SemVer => {
                Some(format!("{}/{}", self.name, self.version.major()))
            }
            PackageIdMode::FullVersion => {
                Some(format!("{}/{}{}", self.name, self.version, owner))
            }
            PackageIdMode::FullRecipe => Some(self.render_recipe(&owner)),
            PackageIdMode::FullPackage => Some(self.render_package(&owner)),
            PackageIdMode::PackageRevision => {
                let base = self.render_package(&owner);
                // Until a binary is produced there is no prev to pin, so
                // the contribution degrades to the package level
                match &self.package_revision {
                    Some(prev) => Some(format!("{}#{}", base, prev)),
                    None => Some(base),
                }
            }
        }
    }

    fn render_recipe(&self, owner: &str) -> String {
        let mut text = format!("{}/{}{}", self.name, self.version, owner);
        if let Some(revision) = &self.revision {
            text.push('#');
            text.push_str(revision);
        }
        text
    }

    fn render_package(&self, owner: &str) -> String {
        let mut text = self.render_recipe(owner);
        if let Some(package_id) = &self.package_id {
            text.push(':');
            text.push_str(package_id);
        }
        text
    }
}

/// The complete fact set hashed into one node's package id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFacts {
    pub settings: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
    pub requires: Vec<RequireFact>,
}

impl NodeFacts {
    /// Canonically ordered hash input lines
    pub fn fact_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (key, value) in &self.settings {
            lines.push(format!("settings:{}={}", key, value));
        }
        for (key, value) in &self.options {
            lines.push(format!("options:{}={}", key, value));
        }
        let mut requires: Vec<&RequireFact> = self.requires.iter().collect();
        requires.sort_by(|a, b| a.name.cmp(&b.name));
        for fact in requires {
            if let Some(rendered) = fact.render() {
                lines.push(format!("requires:{}", rendered));
            }
        }
        lines
    }
}

/// A computed binary fingerprint with the facts that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageId {
    hash: String,
    facts: Vec<String>,
}

impl PackageId {
    /// Hash an ordered fact list
    pub fn compute(facts: &[String]) -> Self {
        let mut hasher = Sha256::new();
        for fact in facts {
            hasher.update(fact.as_bytes());
            hasher.update(b"\n");
        }
        PackageId {
            hash: format!("{:x}", hasher.finalize()),
            facts: facts.to_vec(),
        }
    }

    /// The universal id of a package with no binary variance
    pub fn compute_clear() -> Self {
        PackageId::compute(&[])
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// The fact lines behind the hash, for diagnostics
    pub fn facts(&self) -> &[String] {
        &self.facts
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

/// Assemble the fact set of one graph node
pub fn node_facts(
    graph: &DependencyGraph,
    id: crate::graph::NodeId,
    policy: &ModePolicy,
) -> NodeFacts {
    let node = graph.node(id);
    let mut requires = Vec::new();
    for edge in &node.dependencies {
        // Tool and test dependencies never shape the consumer's binary
        if edge.context == Context::Build || edge.kind == RequireKind::Test {
            continue;
        }
        let dep = graph.node(edge.target);
        requires.push(RequireFact {
            name: dep.reference.name.clone(),
            version: dep.reference.version.clone(),
            user: dep.reference.user.clone(),
            channel: dep.reference.channel.clone(),
            revision: dep
                .reference
                .revision
                .clone()
                .or_else(|| dep.recipe.revision.clone()),
            package_id: dep.package_id.as_ref().map(|p| p.as_str().to_string()),
            package_revision: dep.package_revision.clone(),
            mode: policy.mode_for(&dep.reference.name),
        });
    }
    NodeFacts {
        settings: node.settings.clone(),
        options: node.options.clone(),
        requires,
    }
}

/// Compute and cache the package id of every node, dependencies first
pub fn compute_graph_ids(graph: &mut DependencyGraph, policy: &ModePolicy) {
    for id in graph.topological_ids() {
        let package_id = if graph.node(id).recipe.package_id_clear {
            PackageId::compute_clear()
        } else {
            let facts = node_facts(graph, id, policy);
            PackageId::compute(&facts.fact_lines())
        };
        graph.node_mut(id).package_id = Some(package_id);
    }
}

/// Probe compatibility fallbacks for a binary that actually exists
///
/// Proposals are tried in the provider's preference order; the first id
/// with a binary wins.
pub fn find_compatible(
    facts: &NodeFacts,
    reference: &Reference,
    compatibility: &dyn CompatibilityProvider,
    availability: &dyn BinaryAvailability,
) -> Result<Option<(PackageId, BinaryLocation)>> {
    for alternative in compatibility.propose(facts) {
        let candidate = PackageId::compute(&alternative.fact_lines());
        let location = availability.has_binary(reference, &candidate)?;
        if location != BinaryLocation::Absent {
            tracing::debug!(
                "Accepted compatible package id {} for {}",
                candidate,
                reference
            );
            return Ok(Some((candidate, location)));
        }
    }
    Ok(None)
}
