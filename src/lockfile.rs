// src/lockfile.rs

//! Lockfiles
//!
//! A lockfile snapshots a resolved graph: per node the full reference
//! (revision included), the package id, the package revision once a
//! binary has been produced, and the ids of its requirements split by
//! context. Resolving against a lockfile pins every package it names to
//! the locked version, so ranges stop floating while new requirements
//! still resolve freely.
//!
//! The lockfile is the source of truth for what has been built: filling
//! in a package revision twice is an error, not an update.

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::profile::Profile;
use crate::recipe::Context;
use crate::reference::{RefSpec, Reference, VersionSpec};
use crate::version::{self, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const LOCKFILE_VERSION: &str = "1.0";

/// One locked graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockfileNode {
    #[serde(rename = "ref")]
    pub reference: String,
    pub context: Context,
    pub package_id: Option<String>,
    /// Package revision, filled in once the binary exists
    pub prev: Option<String>,
    /// Lock node ids of host-context requirements
    pub requires: Vec<String>,
    /// Lock node ids of build-context requirements
    pub build_requires: Vec<String>,
}

/// What a lockfile dictates for one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedPin {
    pub version: Version,
    pub revision: Option<String>,
    pub prev: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lockfile {
    pub version: String,
    pub profile_digest: String,
    pub revisions_enabled: bool,
    pub created: String,
    pub nodes: BTreeMap<String, LockfileNode>,
}

impl Lockfile {
    /// Snapshot a resolved graph
    pub fn capture(graph: &DependencyGraph, profile_digest: &str) -> Self {
        let mut nodes = BTreeMap::new();
        for node in graph.nodes() {
            let mut requires = Vec::new();
            let mut build_requires = Vec::new();
            for edge in &node.dependencies {
                let id = edge.target.to_string();
                if graph.node(edge.target).context == Context::Build {
                    build_requires.push(id);
                } else {
                    requires.push(id);
                }
            }
            nodes.insert(
                node.id.to_string(),
                LockfileNode {
                    reference: node.reference.to_string(),
                    context: node.context,
                    package_id: node
                        .effective_package_id()
                        .map(|p| p.as_str().to_string()),
                    prev: node.package_revision.clone(),
                    requires,
                    build_requires,
                },
            );
        }
        let revisions_enabled = graph
            .nodes()
            .any(|n| n.reference.revision.is_some());
        Lockfile {
            version: LOCKFILE_VERSION.to_string(),
            profile_digest: profile_digest.to_string(),
            revisions_enabled,
            created: chrono::Utc::now().to_rfc3339(),
            nodes,
        }
    }

    /// The locked version of a package in one context, if present
    pub fn pin(&self, name: &str, context: Context) -> Option<LockedPin> {
        for node in self.nodes.values() {
            if node.context != context {
                continue;
            }
            let Ok(reference) = node.reference.parse::<Reference>() else {
                continue;
            };
            if reference.name == name {
                return Some(LockedPin {
                    version: reference.version,
                    revision: reference.revision,
                    prev: node.prev.clone(),
                });
            }
        }
        None
    }

    /// The locked pin a requirement replays against
    ///
    /// A graph can hold several nodes of one package (private
    /// duplicates), so the pin is the locked node whose version the
    /// requirement accepts. When none does, nothing is pinned and the
    /// requirement resolves freely.
    pub fn pin_matching(
        &self,
        spec: &RefSpec,
        context: Context,
        requirer: &str,
    ) -> Result<Option<LockedPin>> {
        for node in self.nodes.values() {
            if node.context != context {
                continue;
            }
            let Ok(reference) = node.reference.parse::<Reference>() else {
                continue;
            };
            if reference.name != spec.name
                || reference.user != spec.user
                || reference.channel != spec.channel
            {
                continue;
            }
            let accepted = match &spec.version {
                VersionSpec::Exact(version) => *version == reference.version,
                VersionSpec::Range(expression) => {
                    version::validate(expression, &reference.version, requirer)?
                }
            };
            if accepted {
                return Ok(Some(LockedPin {
                    version: reference.version,
                    revision: reference.revision,
                    prev: node.prev.clone(),
                }));
            }
        }
        Ok(None)
    }

    /// True when the node already has a built package revision
    pub fn is_built(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .is_some_and(|n| n.prev.is_some())
    }

    /// Fill in the package revision after a build completed
    pub fn record_built(&mut self, node_id: &str, prev: &str) -> Result<()> {
        let node = self.nodes.get_mut(node_id).ok_or_else(|| {
            Error::LockfileError(format!("unknown lock node id: {}", node_id))
        })?;
        if let Some(existing) = &node.prev {
            return Err(Error::AlreadyBuiltLocked {
                node_id: node_id.to_string(),
                reference: node.reference.clone(),
                prev: existing.clone(),
            });
        }
        debug!("Recording built package {} as {}", node.reference, prev);
        node.prev = Some(prev.to_string());
        Ok(())
    }

    /// Fail when the lockfile was captured under different profiles
    pub fn check_profile(&self, host: &Profile, build: &Profile) -> Result<()> {
        let digest = crate::profile::combined_digest(host, build);
        if digest != self.profile_digest {
            return Err(Error::LockfileError(format!(
                "profile digest mismatch: lockfile was captured with {}, current profiles hash to {}",
                self.profile_digest, digest
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a serialized lockfile
    pub fn from_json(text: &str) -> Result<Self> {
        let lockfile: Lockfile = serde_json::from_str(text)?;
        if lockfile.version != LOCKFILE_VERSION {
            return Err(Error::LockfileError(format!(
                "unsupported lockfile version: {}",
                lockfile.version
            )));
        }
        for (id, node) in &lockfile.nodes {
            if node.reference.parse::<Reference>().is_err() {
                return Err(Error::LockfileError(format!(
                    "node {} has an invalid reference: {}",
                    id, node.reference
                )));
            }
            for required in node.requires.iter().chain(&node.build_requires) {
                if !lockfile.nodes.contains_key(required) {
                    return Err(Error::LockfileError(format!(
                        "node {} requires unknown lock node id: {}",
                        id, required
                    )));
                }
            }
        }
        Ok(lockfile)
    }
}
