// src/plan.rs

//! Build order planning
//!
//! Turns a status-resolved graph into levels of packages that must be
//! built from source. Everything in one level only depends on satisfied
//! binaries (cached, downloadable, skipped, already built per the
//! lockfile) or on earlier levels, so a level's packages can be built in
//! parallel and levels run in sequence.
//!
//! Nodes the lockfile marks as built are left out entirely: re-planning
//! after some levels completed yields exactly the remaining suffix.

use crate::error::{Error, Result};
use crate::graph::{BinaryStatus, DependencyGraph, GraphNode, NodeId};
use crate::lockfile::Lockfile;
use crate::recipe::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

/// One package to build, with everything the executor needs to name it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOrderEntry {
    pub reference: String,
    pub package_id: Option<String>,
    pub context: Context,
    /// Key of this package in the lockfile captured from the same graph
    pub lock_node_id: String,
}

/// Packages to build, grouped into dependency levels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOrder {
    pub levels: Vec<Vec<BuildOrderEntry>>,
}

impl BuildOrder {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Total number of packages across all levels
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Compute the leveled build order of a graph
///
/// Expects binary statuses to be resolved already. The root is never
/// part of the order; building it is the caller's own final step.
pub fn plan(graph: &DependencyGraph, lockfile: Option<&Lockfile>) -> Result<BuildOrder> {
    let locked_built = |id: NodeId| {
        lockfile.is_some_and(|lock| lock.is_built(&id.to_string()))
    };

    let mut to_build: BTreeSet<NodeId> = graph
        .nodes()
        .filter(|n| {
            n.binary_status == BinaryStatus::Build
                && n.id != graph.root()
                && !locked_built(n.id)
        })
        .map(|n| n.id)
        .collect();

    let mut placed: BTreeSet<NodeId> = BTreeSet::new();
    let mut levels = Vec::new();

    while !to_build.is_empty() {
        let mut level_ids: Vec<NodeId> = Vec::new();
        for &id in &to_build {
            let ready = graph.node(id).dependencies.iter().all(|edge| {
                let target = edge.target;
                if placed.contains(&target) {
                    return true;
                }
                if to_build.contains(&target) {
                    return false;
                }
                let status = graph.node(target).binary_status;
                matches!(
                    status,
                    BinaryStatus::Cache | BinaryStatus::Download | BinaryStatus::Skip
                ) || locked_built(target)
            });
            if ready {
                level_ids.push(id);
            }
        }

        if level_ids.is_empty() {
            let stuck: Vec<String> = to_build
                .iter()
                .map(|id| graph.node(*id).reference.to_string())
                .collect();
            return Err(Error::LoopDetected {
                cycle: stuck.join(" -> "),
            });
        }

        for id in &level_ids {
            to_build.remove(id);
            placed.insert(*id);
        }
        let mut entries: Vec<BuildOrderEntry> = level_ids
            .iter()
            .map(|&id| entry_for(graph.node(id)))
            .collect();
        entries.sort_by(|a, b| a.reference.cmp(&b.reference));
        levels.push(entries);
    }

    let order = BuildOrder { levels };
    info!(
        "Build order: {} package(s) across {} level(s)",
        order.len(),
        order.levels.len()
    );
    Ok(order)
}

fn entry_for(node: &GraphNode) -> BuildOrderEntry {
    BuildOrderEntry {
        reference: node.reference.to_string(),
        package_id: node
            .effective_package_id()
            .map(|p| p.as_str().to_string()),
        context: node.context,
        lock_node_id: node.id.to_string(),
    }
}
