// src/binary.rs

//! Binary status resolution
//!
//! Decides, per graph node, where its binary comes from: the local cache,
//! a remote, a from-source build, or nowhere. Availability probes are
//! independent per node and run on a bounded worker pool; statuses are
//! then applied sequentially so policy decisions stay deterministic.
//!
//! Missing binaries are collected across the whole graph and reported in
//! one error rather than failing on the first hole.

use crate::error::{Error, Result};
use crate::graph::{BinaryStatus, DependencyGraph, NodeId};
use crate::lockfile::Lockfile;
use crate::package_id::{
    ModePolicy, NodeFacts, PackageId, compute_graph_ids, find_compatible, node_facts,
};
use crate::providers::{BinaryAvailability, BinaryLocation, CompatibilityProvider};
use crate::recipe::{RequireKind, Visibility};
use crate::reference::Reference;
use rayon::prelude::*;
use std::str::FromStr;
use tracing::{debug, info};

/// What the user asked to build from source
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildPolicy {
    /// Build nothing; every dependency must have a binary
    #[default]
    Never,
    /// Build whatever has no binary anywhere
    Missing,
    /// Like `Missing`, and also rebuild binaries whose recipe revision
    /// no longer matches the resolved one
    Outdated,
    /// Like `Missing`, and also rebuild everything downstream of any
    /// node being built
    Cascade,
    /// Build packages whose name matches any of these glob patterns
    Patterns(Vec<String>),
}

impl FromStr for BuildPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "never" => Ok(BuildPolicy::Never),
            "missing" => Ok(BuildPolicy::Missing),
            "outdated" => Ok(BuildPolicy::Outdated),
            "cascade" => Ok(BuildPolicy::Cascade),
            pattern => Ok(BuildPolicy::Patterns(vec![pattern.to_string()])),
        }
    }
}

/// Knobs for one binary resolution pass
#[derive(Debug, Clone)]
pub struct ResolveConfig {
    pub build_policy: BuildPolicy,
    /// Worker threads for availability probes; 0 lets the pool decide
    pub workers: usize,
    pub mode_policy: ModePolicy,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        ResolveConfig {
            build_policy: BuildPolicy::Never,
            workers: 8,
            mode_policy: ModePolicy::default(),
        }
    }
}

impl ResolveConfig {
    pub fn new() -> Self {
        ResolveConfig::default()
    }

    pub fn with_policy(mut self, policy: BuildPolicy) -> Self {
        self.build_policy = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_mode_policy(mut self, policy: ModePolicy) -> Self {
        self.mode_policy = policy;
        self
    }
}

struct Probe {
    id: NodeId,
    location: BinaryLocation,
    compatible: Option<(PackageId, BinaryLocation)>,
    binary_revision: Option<String>,
}

/// Resolve the binary status of every node in the graph
///
/// Package ids are computed first if a previous pass has not done so.
/// The root always builds locally.
pub fn resolve_binaries(
    graph: &mut DependencyGraph,
    config: &ResolveConfig,
    availability: &dyn BinaryAvailability,
    compatibility: &dyn CompatibilityProvider,
    lockfile: Option<&Lockfile>,
) -> Result<()> {
    if graph.nodes().any(|n| n.package_id.is_none()) {
        compute_graph_ids(graph, &config.mode_policy);
    }
    let root = graph.root();
    graph.node_mut(root).binary_status = BinaryStatus::Build;

    let probes = collect_probes(graph, config);
    let check_revisions = config.build_policy == BuildPolicy::Outdated;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;
    let results: Result<Vec<Probe>> = pool.install(|| {
        probes
            .par_iter()
            .map(|(id, reference, package_id, facts)| {
                let location = availability.has_binary(reference, package_id)?;
                let compatible = if location == BinaryLocation::Absent {
                    find_compatible(facts, reference, compatibility, availability)?
                } else {
                    None
                };
                let binary_revision = if check_revisions {
                    availability.has_recipe_revision(reference)?
                } else {
                    None
                };
                Ok(Probe {
                    id: *id,
                    location,
                    compatible,
                    binary_revision,
                })
            })
            .collect()
    });

    for probe in results? {
        apply_status(graph, config, lockfile, probe)?;
    }

    if config.build_policy == BuildPolicy::Cascade {
        cascade(graph, lockfile)?;
    }
    skip_unneeded(graph);

    let missing: Vec<String> = graph
        .nodes()
        .filter(|n| n.binary_status == BinaryStatus::Missing)
        .map(|n| n.reference.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingBinary { missing });
    }

    info!(
        "Binary statuses resolved: {} to build, {} cached, {} to download, {} skipped",
        count(graph, BinaryStatus::Build),
        count(graph, BinaryStatus::Cache),
        count(graph, BinaryStatus::Download),
        count(graph, BinaryStatus::Skip),
    );
    Ok(())
}

type ProbeInput = (NodeId, Reference, PackageId, NodeFacts);

fn collect_probes(graph: &DependencyGraph, config: &ResolveConfig) -> Vec<ProbeInput> {
    graph
        .nodes()
        .filter(|n| n.id != graph.root())
        .filter_map(|n| {
            let package_id = n.package_id.clone()?;
            let facts = node_facts(graph, n.id, &config.mode_policy);
            Some((n.id, n.reference.clone(), package_id, facts))
        })
        .collect()
}

fn apply_status(
    graph: &mut DependencyGraph,
    config: &ResolveConfig,
    lockfile: Option<&Lockfile>,
    probe: Probe,
) -> Result<()> {
    let Probe {
        id,
        location,
        compatible,
        binary_revision,
    } = probe;
    let reference = graph.node(id).reference.clone();
    let requested = match &config.build_policy {
        BuildPolicy::Patterns(patterns) => patterns
            .iter()
            .any(|p| glob_match(p, &reference.name)),
        _ => false,
    };

    if requested {
        if let Some(prev) = locked_prev(graph, lockfile, id) {
            return Err(Error::AlreadyBuiltLocked {
                node_id: id.to_string(),
                reference: reference.to_string(),
                prev,
            });
        }
        graph.node_mut(id).binary_status = BinaryStatus::Build;
        return Ok(());
    }

    if locked_prev(graph, lockfile, id).is_some() {
        // The lockfile vouches for this binary; prefer whatever the
        // probe located, defaulting to the cache
        graph.node_mut(id).binary_status = match location {
            BinaryLocation::Remote(_) => BinaryStatus::Download,
            _ => BinaryStatus::Cache,
        };
        return Ok(());
    }

    let status = match location {
        BinaryLocation::Cache => {
            if is_outdated(config, &reference, &binary_revision) {
                BinaryStatus::Build
            } else {
                BinaryStatus::Cache
            }
        }
        BinaryLocation::Remote(_) => {
            if is_outdated(config, &reference, &binary_revision) {
                BinaryStatus::Build
            } else {
                BinaryStatus::Download
            }
        }
        BinaryLocation::Absent => match compatible {
            Some((compatible_id, found_at)) => {
                debug!(
                    "{} uses compatible binary {} instead of {}",
                    reference,
                    compatible_id,
                    graph
                        .node(id)
                        .package_id
                        .as_ref()
                        .map(|p| p.as_str())
                        .unwrap_or("?")
                );
                graph.node_mut(id).compatible_package_id = Some(compatible_id);
                match found_at {
                    BinaryLocation::Remote(_) => BinaryStatus::Download,
                    _ => BinaryStatus::Cache,
                }
            }
            None => match config.build_policy {
                BuildPolicy::Missing | BuildPolicy::Outdated | BuildPolicy::Cascade => {
                    BinaryStatus::Build
                }
                BuildPolicy::Never | BuildPolicy::Patterns(_) => BinaryStatus::Missing,
            },
        },
    };
    graph.node_mut(id).binary_status = status;
    Ok(())
}

/// A hit is outdated when the binary's recipe revision no longer matches
/// the resolved one
fn is_outdated(
    config: &ResolveConfig,
    reference: &Reference,
    binary_revision: &Option<String>,
) -> bool {
    if config.build_policy != BuildPolicy::Outdated {
        return false;
    }
    match (binary_revision, &reference.revision) {
        (Some(built_from), Some(resolved)) => built_from != resolved,
        _ => false,
    }
}

fn locked_prev(
    graph: &DependencyGraph,
    lockfile: Option<&Lockfile>,
    id: NodeId,
) -> Option<String> {
    if let Some(prev) = &graph.node(id).package_revision {
        return Some(prev.clone());
    }
    lockfile
        .and_then(|lock| lock.nodes.get(&id.to_string()))
        .and_then(|node| node.prev.clone())
}

/// Mark consumers of anything being rebuilt, dependencies first so the
/// marking rolls all the way downstream
fn cascade(graph: &mut DependencyGraph, lockfile: Option<&Lockfile>) -> Result<()> {
    for id in graph.topological_ids() {
        if graph.node(id).binary_status == BinaryStatus::Build {
            continue;
        }
        let rebuilding_dep = graph
            .node(id)
            .dependencies
            .iter()
            .any(|e| graph.node(e.target).binary_status == BinaryStatus::Build);
        if rebuilding_dep {
            if let Some(prev) = locked_prev(graph, lockfile, id) {
                return Err(Error::AlreadyBuiltLocked {
                    node_id: id.to_string(),
                    reference: graph.node(id).reference.to_string(),
                    prev,
                });
            }
            debug!(
                "Cascade: {} rebuilt because a dependency rebuilds",
                graph.node(id).reference
            );
            graph.node_mut(id).binary_status = BinaryStatus::Build;
        }
    }
    Ok(())
}

/// Skip binaries nothing will ever link: every consumer resolves without
/// building, and any consumer that still materializes reaches this node
/// only through private or test edges
///
/// Consumers are visited before their dependencies, so a skip travels
/// down whole private subtrees.
fn skip_unneeded(graph: &mut DependencyGraph) {
    let mut order = graph.topological_ids();
    order.reverse();
    for id in order {
        if id == graph.root() {
            continue;
        }
        let node = graph.node(id);
        if !matches!(
            node.binary_status,
            BinaryStatus::Missing | BinaryStatus::Download | BinaryStatus::Cache
        ) {
            continue;
        }
        if node.dependents.is_empty() {
            continue;
        }

        let mut linked_by_materialized = false;
        let mut consumers_satisfied = true;
        for &consumer in &node.dependents {
            let consumer_status = graph.node(consumer).binary_status;
            if !matches!(
                consumer_status,
                BinaryStatus::Cache | BinaryStatus::Download | BinaryStatus::Skip
            ) {
                consumers_satisfied = false;
            }
            // A skipped consumer materializes nothing, so its edges
            // cannot link this node either
            if consumer_status == BinaryStatus::Skip {
                continue;
            }
            for edge in &graph.node(consumer).dependencies {
                if edge.target != id {
                    continue;
                }
                if edge.visibility == Visibility::Public && edge.kind != RequireKind::Test {
                    linked_by_materialized = true;
                }
            }
        }
        if !linked_by_materialized && consumers_satisfied {
            debug!("Skipping {}: no materialized consumer links it", node.reference);
            graph.node_mut(id).binary_status = BinaryStatus::Skip;
        }
    }
}

fn count(graph: &DependencyGraph, status: BinaryStatus) -> usize {
    graph.nodes().filter(|n| n.binary_status == status).count()
}

/// Match a name against a pattern where `*` spans any characters
fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut position = 0;
    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if index == 0 {
            if !text.starts_with(part) {
                return false;
            }
            position = part.len();
        } else {
            match text[position..].find(part) {
                Some(found) => position += found + part.len(),
                None => return false,
            }
        }
    }
    if !pattern.ends_with('*') {
        if let Some(last) = parts.last() {
            if !text.ends_with(last) {
                return false;
            }
        }
    }
    true
}
