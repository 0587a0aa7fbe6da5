// src/graph/mod.rs

//! Dependency graph
//!
//! Nodes live in an arena `Vec` and refer to each other through `NodeId`
//! indices, so the graph is `Clone` and edges are cheap. Each node records
//! its context, effective configuration, resolved recipe metadata and,
//! once later passes run, its package id and binary status.

pub mod builder;

pub use builder::GraphBuilder;

use crate::package_id::PackageId;
use crate::recipe::{Context, RecipeMetadata, RequireKind, Visibility};
use crate::reference::Reference;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Index of a node in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        NodeId(index as u32)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What is known about a node's binary after status resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryStatus {
    #[default]
    Unknown,
    /// Present in the local cache
    Cache,
    /// Fetchable from a remote
    Download,
    /// Must be built from source
    Build,
    /// Absent and the policy does not allow building it
    Missing,
    /// Not needed for this resolution
    Skip,
}

impl BinaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryStatus::Unknown => "unknown",
            BinaryStatus::Cache => "cache",
            BinaryStatus::Download => "download",
            BinaryStatus::Build => "build",
            BinaryStatus::Missing => "missing",
            BinaryStatus::Skip => "skip",
        }
    }
}

impl fmt::Display for BinaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An edge from a requirer to its resolved dependency
#[derive(Debug, Clone)]
pub struct DepEdge {
    pub target: NodeId,
    pub visibility: Visibility,
    pub kind: RequireKind,
    /// Context the requirement was declared for, before mapping
    pub context: Context,
    /// The version expression as the requirer wrote it
    pub expression: String,
}

/// One resolved package in the graph
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub reference: Reference,
    pub context: Context,
    /// Settings narrowed to what this recipe declares relevant
    pub settings: BTreeMap<String, String>,
    /// Effective options after profile scoping over recipe defaults
    pub options: BTreeMap<String, String>,
    pub dependencies: Vec<DepEdge>,
    /// Back references, not owning
    pub dependents: Vec<NodeId>,
    pub package_id: Option<PackageId>,
    /// Substitute id accepted through compatibility, if any
    pub compatible_package_id: Option<PackageId>,
    pub binary_status: BinaryStatus,
    pub recipe: RecipeMetadata,
    /// Shortest distance from the root
    pub depth: u32,
    /// Package revision pinned by a lockfile or recorded after a build
    pub package_revision: Option<String>,
}

impl GraphNode {
    /// The id binaries are looked up under, preferring a compatible substitute
    pub fn effective_package_id(&self) -> Option<&PackageId> {
        self.compatible_package_id.as_ref().or(self.package_id.as_ref())
    }
}

/// A version replacement applied while building the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionWarning {
    pub package: String,
    pub requirer: String,
    pub previous: String,
    pub replacement: String,
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} overridden: {} -> {} (declared by {})",
            self.package, self.previous, self.replacement, self.requirer
        )
    }
}

/// The resolved dependency graph
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    root: NodeId,
    warnings: Vec<ResolutionWarning>,
}

impl DependencyGraph {
    pub(crate) fn new() -> Self {
        DependencyGraph {
            nodes: Vec::new(),
            root: NodeId(0),
            warnings: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut GraphNode {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn warnings(&self) -> &[ResolutionWarning] {
        &self.warnings
    }

    pub(crate) fn record_warning(&mut self, warning: ResolutionWarning) {
        self.warnings.push(warning);
    }

    pub(crate) fn add_node(
        &mut self,
        reference: Reference,
        context: Context,
        settings: BTreeMap<String, String>,
        options: BTreeMap<String, String>,
        recipe: RecipeMetadata,
        depth: u32,
    ) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(GraphNode {
            id,
            reference,
            context,
            settings,
            options,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            package_id: None,
            compatible_package_id: None,
            binary_status: BinaryStatus::Unknown,
            recipe,
            depth,
            package_revision: None,
        });
        id
    }

    pub(crate) fn add_edge(&mut self, from: NodeId, edge: DepEdge) {
        let target = edge.target;
        self.nodes[from.index()].dependencies.push(edge);
        self.nodes[target.index()].dependents.push(from);
    }

    /// Nodes resolved in the host context, root excluded
    pub fn host_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.context == Context::Host && n.id != self.root)
            .map(|n| n.id)
            .collect()
    }

    /// Nodes resolved in the build context
    pub fn build_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.context == Context::Build && n.id != self.root)
            .map(|n| n.id)
            .collect()
    }

    /// Find a package by name within one context
    pub fn find(&self, name: &str, context: Context) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.reference.name == name && n.context == context)
            .map(|n| n.id)
    }

    /// Everything a node links against or runs
    ///
    /// Direct edges keep their declared kind. The walk then continues
    /// through public, non-test edges of reached nodes, reporting those
    /// as transitive.
    pub fn transitive_dependencies(&self, id: NodeId) -> Vec<(NodeId, RequireKind)> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::new();

        for edge in &self.nodes[id.index()].dependencies {
            if seen.insert(edge.target) {
                out.push((edge.target, edge.kind));
                queue.push_back(edge.target);
            }
        }

        while let Some(current) = queue.pop_front() {
            for edge in &self.nodes[current.index()].dependencies {
                if edge.visibility != Visibility::Public || edge.kind == RequireKind::Test {
                    continue;
                }
                if seen.insert(edge.target) {
                    out.push((edge.target, RequireKind::Transitive));
                    queue.push_back(edge.target);
                }
            }
        }
        out
    }

    /// All nodes that depend on `id`, directly or through others
    pub fn transitive_dependents(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for &dependent in &self.nodes[current.index()].dependents {
                if seen.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Node ids with every dependency ordered before its dependents
    ///
    /// Ties break toward lower ids, so the order is stable across runs.
    pub fn topological_ids(&self) -> Vec<NodeId> {
        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| {
                let targets: BTreeSet<NodeId> =
                    n.dependencies.iter().map(|e| e.target).collect();
                targets.len()
            })
            .collect();

        let mut ready: BTreeSet<NodeId> = self
            .nodes
            .iter()
            .filter(|n| pending[n.id.index()] == 0)
            .map(|n| n.id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(&next) = ready.iter().next() {
            ready.remove(&next);
            order.push(next);
            let dependents: BTreeSet<NodeId> =
                self.nodes[next.index()].dependents.iter().copied().collect();
            for dependent in dependents {
                pending[dependent.index()] -= 1;
                if pending[dependent.index()] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        // The builder rejects cycles, so everything should be emitted;
        // any leftover is appended in id order rather than dropped
        if order.len() < self.nodes.len() {
            let emitted: BTreeSet<NodeId> = order.iter().copied().collect();
            for node in &self.nodes {
                if !emitted.contains(&node.id) {
                    order.push(node.id);
                }
            }
        }
        order
    }

    /// Path of references from the root down to a node
    pub fn requirer_chain(&self, id: NodeId) -> String {
        let mut chain = vec![self.nodes[id.index()].reference.to_string()];
        let mut current = id;
        while current != self.root {
            let Some(&parent) = self.nodes[current.index()]
                .dependents
                .iter()
                .min_by_key(|d| self.nodes[d.index()].depth)
            else {
                break;
            };
            chain.push(self.nodes[parent.index()].reference.to_string());
            current = parent;
        }
        chain.reverse();
        chain.join(" -> ")
    }
}
