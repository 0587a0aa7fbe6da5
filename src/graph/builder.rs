// src/graph/builder.rs

//! Graph construction
//!
//! Breadth-first expansion from a root recipe. Each requirement is
//! resolved through pins (lockfile first, then forced versions, then
//! ancestor overrides) before falling back to range resolution against
//! the provider's candidate list.
//!
//! Reconciliation happens as edges land: equal versions of the same
//! package merge onto one node per context, a range still satisfied by
//! the version another branch chose merges too, and remaining mismatches
//! are a conflict unless a force wins. A winning force restarts the
//! whole expansion with the forced version pinned so every branch
//! resolves against it. Overrides never add edges; they only steer what
//! their own subtree resolves, and a subtree absorbed after its override
//! was declared is caught by a closing audit and replayed through the
//! same restart.

use crate::error::{Error, Result};
use crate::graph::{DepEdge, DependencyGraph, NodeId, ResolutionWarning};
use crate::lockfile::Lockfile;
use crate::profile::Profile;
use crate::providers::RecipeProvider;
use crate::recipe::{Context, RecipeMetadata, RequireKind, Requirement, Visibility};
use crate::reference::{Reference, VersionSpec};
use crate::version::{self, Version};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Builds a dependency graph from recipes served by a provider
pub struct GraphBuilder<'a> {
    provider: &'a dyn RecipeProvider,
    lockfile: Option<&'a Lockfile>,
}

/// A version fixed by a winning force requirement, applied everywhere
#[derive(Debug, Clone)]
struct ForcedPin {
    version: Version,
    user: Option<String>,
    channel: Option<String>,
    revision: Option<String>,
}

/// A version fixed by an override, applied to the declarer's subtree
#[derive(Debug, Clone)]
struct OverridePin {
    version: Version,
    user: Option<String>,
    channel: Option<String>,
    revision: Option<String>,
    declarer: NodeId,
    depth: u32,
}

/// An override whose subtree had already expanded when it was declared,
/// replayed against the named requirers on the next pass
#[derive(Debug, Clone)]
struct LateOverride {
    version: Version,
    user: Option<String>,
    channel: Option<String>,
    revision: Option<String>,
    covered: BTreeSet<String>,
}

enum Expansion {
    Complete(DependencyGraph),
    Restart,
}

/// A requirement turned concrete, with how it got there
struct ResolvedRequirement {
    reference: Reference,
    warning: Option<ResolutionWarning>,
    /// Locked package revision for the node, when the lockfile pinned it
    locked_prev: Option<String>,
    /// True when a lockfile, force, or override chose the version
    pinned: bool,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(provider: &'a dyn RecipeProvider) -> Self {
        GraphBuilder {
            provider,
            lockfile: None,
        }
    }

    /// Constrain resolution to versions already present in a lockfile
    pub fn with_lockfile(mut self, lockfile: &'a Lockfile) -> Self {
        self.lockfile = Some(lockfile);
        self
    }

    /// Expand the full graph for a root recipe under two profiles
    pub fn build(
        &self,
        root: &RecipeMetadata,
        profile_host: &Profile,
        profile_build: &Profile,
    ) -> Result<DependencyGraph> {
        let mut forced: HashMap<(Context, String), ForcedPin> = HashMap::new();
        let mut late: HashMap<(Context, String), LateOverride> = HashMap::new();
        loop {
            match self.expand(root, profile_host, profile_build, &mut forced, &mut late)? {
                Expansion::Complete(graph) => {
                    check_provides(&graph)?;
                    info!(
                        "Resolved dependency graph for {}: {} nodes ({} host, {} build)",
                        root.name,
                        graph.len(),
                        graph.host_nodes().len(),
                        graph.build_nodes().len()
                    );
                    return Ok(graph);
                }
                Expansion::Restart => {
                    debug!(
                        "Restarting graph expansion with {} forced and {} late override pin(s)",
                        forced.len(),
                        late.len()
                    );
                }
            }
        }
    }

    fn expand(
        &self,
        root: &RecipeMetadata,
        profile_host: &Profile,
        profile_build: &Profile,
        forced: &mut HashMap<(Context, String), ForcedPin>,
        late: &mut HashMap<(Context, String), LateOverride>,
    ) -> Result<Expansion> {
        let mut graph = DependencyGraph::new();
        let mut public_index: HashMap<(Context, String), NodeId> = HashMap::new();
        let mut overrides: HashMap<(Context, String), Vec<OverridePin>> = HashMap::new();

        let root_settings = profile_host.settings_for(&root.relevant_settings);
        let mut root_options = root.default_options.clone();
        root_options.extend(profile_host.options_for(&root.name));
        let root_id = graph.add_node(
            root.reference(),
            Context::Host,
            root_settings,
            root_options,
            root.clone(),
            0,
        );
        public_index.insert((Context::Host, root.name.clone()), root_id);

        let mut queue = VecDeque::from([root_id]);
        while let Some(current) = queue.pop_front() {
            let requirer_ref = graph.node(current).reference.clone();
            let requirer_depth = graph.node(current).depth;
            let requirer_context = graph.node(current).context;
            let requirements = graph.node(current).recipe.requirements.clone();

            for requirement in &requirements {
                // Test dependencies of transitive packages are not ours to run
                if requirement.kind == RequireKind::Test && current != root_id {
                    continue;
                }

                let context = if requirer_context == Context::Build
                    || requirement.context == Context::Build
                {
                    Context::Build
                } else {
                    Context::Host
                };
                let profile = match context {
                    Context::Host => profile_host,
                    Context::Build => profile_build,
                };
                let name = requirement.spec.name.clone();
                let key = (context, name.clone());

                if requirement.is_override {
                    let (version, revision) =
                        self.resolve_spec(requirement, &requirer_ref.to_string())?;
                    debug!(
                        "{} declares override {}/{} for the {} context",
                        requirer_ref, name, version, context
                    );
                    overrides.entry(key).or_default().push(OverridePin {
                        version,
                        user: requirement.spec.user.clone(),
                        channel: requirement.spec.channel.clone(),
                        revision: revision.or_else(|| requirement.spec.revision.clone()),
                        declarer: current,
                        depth: requirer_depth,
                    });
                    continue;
                }

                let ResolvedRequirement {
                    mut reference,
                    warning,
                    locked_prev,
                    pinned,
                } = self.resolve_requirement(
                    &graph,
                    requirement,
                    &requirer_ref,
                    current,
                    context,
                    forced,
                    &overrides,
                    late,
                )?;
                if let Some(warning) = warning {
                    warn!("{}", warning);
                    graph.record_warning(warning);
                }

                let recipe = self
                    .provider
                    .get_recipe(&reference)?
                    .ok_or_else(|| Error::RecipeNotFound(reference.to_string()))?;
                if reference.revision.is_none() {
                    reference.revision = recipe.revision.clone();
                }

                // Revisiting a reference already on the path to the root is a loop
                let mut ancestors = graph.transitive_dependents(current);
                ancestors.push(current);
                let looped = ancestors.iter().copied().find(|&a| {
                    let node = graph.node(a);
                    node.context == context
                        && node.reference.name == reference.name
                        && node.reference.version == reference.version
                        && node.reference.same_owner(&reference)
                });
                if let Some(ancestor) = looped {
                    return Err(Error::LoopDetected {
                        cycle: cycle_string(&graph, ancestor, current),
                    });
                }

                let mergeable = requirement.visibility == Visibility::Public
                    && requirement.kind != RequireKind::Test;
                if mergeable {
                    if let Some(&existing) = public_index.get(&key) {
                        let existing_ref = graph.node(existing).reference.clone();
                        if existing_ref.version == reference.version
                            && existing_ref.same_owner(&reference)
                        {
                            graph.add_edge(current, make_edge(requirement, existing));
                            if requirement.force {
                                register_forced(forced, key, &reference);
                            }
                            continue;
                        }
                        // A looser second range may still be satisfied
                        // by the version another branch already chose
                        if let VersionSpec::Range(expr) = &requirement.spec.version {
                            if !pinned
                                && !requirement.force
                                && existing_ref.same_owner(&reference)
                                && version::validate(
                                    expr,
                                    &existing_ref.version,
                                    &requirer_ref.to_string(),
                                )?
                            {
                                debug!(
                                    "{} accepts already-resolved {} for [{}]",
                                    requirer_ref, existing_ref, expr
                                );
                                graph.add_edge(current, make_edge(requirement, existing));
                                continue;
                            }
                        }
                        if requirement.force
                            && register_forced(forced, key.clone(), &reference)
                        {
                            return Ok(Expansion::Restart);
                        }
                        return Err(Error::VersionConflict {
                            name,
                            branch_a: graph.requirer_chain(existing),
                            version_a: existing_ref.version.to_string(),
                            branch_b: format!(
                                "{} -> {}",
                                graph.requirer_chain(current),
                                reference
                            ),
                            version_b: reference.version.to_string(),
                        });
                    }
                }

                let settings = profile.settings_for(&recipe.relevant_settings);
                let mut options = recipe.default_options.clone();
                options.extend(profile.options_for(&name));
                let node_id = graph.add_node(
                    reference.clone(),
                    context,
                    settings,
                    options,
                    recipe,
                    requirer_depth + 1,
                );
                graph.node_mut(node_id).package_revision = locked_prev;
                graph.add_edge(current, make_edge(requirement, node_id));
                if mergeable {
                    public_index.insert(key.clone(), node_id);
                }
                if requirement.force {
                    register_forced(forced, key, &reference);
                }
                debug!(
                    "Resolved {} in the {} context at depth {}",
                    reference,
                    context,
                    requirer_depth + 1
                );
                queue.push_back(node_id);
            }
        }

        if self.audit_overrides(&graph, &overrides, forced, late)? {
            return Ok(Expansion::Restart);
        }

        Ok(Expansion::Complete(graph))
    }

    /// Resolve an override declaration to a concrete version
    fn resolve_spec(
        &self,
        requirement: &Requirement,
        requirer: &str,
    ) -> Result<(Version, Option<String>)> {
        match &requirement.spec.version {
            VersionSpec::Exact(v) => Ok((v.clone(), requirement.spec.revision.clone())),
            VersionSpec::Range(expr) => {
                let candidates = self
                    .provider
                    .list_candidate_versions(&requirement.spec.name)?;
                let version = version::resolve(expr, &candidates, requirer)?;
                Ok((version, None))
            }
        }
    }

    /// Turn a requirement into a concrete reference, honoring pins
    ///
    /// Also reports a warning when a pin replaced what the requirer
    /// actually asked for.
    #[allow(clippy::too_many_arguments)]
    fn resolve_requirement(
        &self,
        graph: &DependencyGraph,
        requirement: &Requirement,
        requirer_ref: &Reference,
        requirer: NodeId,
        context: Context,
        forced: &HashMap<(Context, String), ForcedPin>,
        overrides: &HashMap<(Context, String), Vec<OverridePin>>,
        late: &HashMap<(Context, String), LateOverride>,
    ) -> Result<ResolvedRequirement> {
        let name = &requirement.spec.name;
        let key = (context, name.clone());

        if let Some(lock) = self.lockfile {
            if let Some(pin) =
                lock.pin_matching(&requirement.spec, context, &requirer_ref.to_string())?
            {
                debug!(
                    "{} pinned to {} by the lockfile for {}",
                    name, pin.version, requirer_ref
                );
                let reference = Reference {
                    name: name.clone(),
                    version: pin.version,
                    user: requirement.spec.user.clone(),
                    channel: requirement.spec.channel.clone(),
                    revision: pin.revision,
                };
                return Ok(ResolvedRequirement {
                    reference,
                    warning: None,
                    locked_prev: pin.prev,
                    pinned: true,
                });
            }
        }

        if let Some(pin) = forced.get(&key) {
            let warning = replacement_warning(requirement, requirer_ref, &pin.version)?;
            let reference = Reference {
                name: name.clone(),
                version: pin.version.clone(),
                user: pin.user.clone(),
                channel: pin.channel.clone(),
                revision: pin.revision.clone(),
            };
            return Ok(ResolvedRequirement {
                reference,
                warning,
                locked_prev: None,
                pinned: true,
            });
        }

        if let Some(pin) = late.get(&key) {
            if pin.covered.contains(&requirer_ref.to_string()) {
                let warning = replacement_warning(requirement, requirer_ref, &pin.version)?;
                let reference = Reference {
                    name: name.clone(),
                    version: pin.version.clone(),
                    user: pin.user.clone(),
                    channel: pin.channel.clone(),
                    revision: pin.revision.clone(),
                };
                return Ok(ResolvedRequirement {
                    reference,
                    warning,
                    locked_prev: None,
                    pinned: true,
                });
            }
        }

        let mut chosen: Option<&OverridePin> = None;
        if let Some(pins) = overrides.get(&key) {
            for pin in pins {
                if pin_applies(graph, pin.declarer, requirer) {
                    let closer = match chosen {
                        None => true,
                        Some(current) => pin.depth < current.depth,
                    };
                    if closer {
                        chosen = Some(pin);
                    }
                }
            }
        }
        if let Some(pin) = chosen {
            let warning = replacement_warning(requirement, requirer_ref, &pin.version)?;
            let reference = Reference {
                name: name.clone(),
                version: pin.version.clone(),
                user: pin.user.clone(),
                channel: pin.channel.clone(),
                revision: pin.revision.clone(),
            };
            return Ok(ResolvedRequirement {
                reference,
                warning,
                locked_prev: None,
                pinned: true,
            });
        }

        let version = match &requirement.spec.version {
            VersionSpec::Exact(v) => v.clone(),
            VersionSpec::Range(expr) => {
                let candidates = self.provider.list_candidate_versions(name)?;
                version::resolve(expr, &candidates, &requirer_ref.to_string())?
            }
        };
        Ok(ResolvedRequirement {
            reference: requirement.spec.to_reference(version),
            warning: None,
            locked_prev: None,
            pinned: false,
        })
    }

    /// Catch overrides that landed after their subtree had expanded
    ///
    /// A declarer can absorb an already-resolved branch through a merge
    /// edge, in which case its pins never saw that branch's
    /// requirements. Each dropped pin is recorded against the requirers
    /// it should have steered and the expansion reruns with them.
    fn audit_overrides(
        &self,
        graph: &DependencyGraph,
        overrides: &HashMap<(Context, String), Vec<OverridePin>>,
        forced: &HashMap<(Context, String), ForcedPin>,
        late: &mut HashMap<(Context, String), LateOverride>,
    ) -> Result<bool> {
        let mut changed = false;
        for (key, pins) in overrides {
            if forced.contains_key(key) {
                continue;
            }
            for pin in pins {
                for node in graph.nodes() {
                    if node.context != key.0
                        || node.reference.name != key.1
                        || node.reference.version == pin.version
                    {
                        continue;
                    }
                    for &requirer in &node.dependents {
                        if !pin_applies(graph, pin.declarer, requirer) {
                            continue;
                        }
                        if self.lock_outranks(graph, requirer, key)? {
                            continue;
                        }
                        let covered = graph.node(requirer).reference.to_string();
                        match late.entry(key.clone()) {
                            Entry::Occupied(mut slot) => {
                                if slot.get().version != pin.version {
                                    return Err(Error::VersionConflict {
                                        name: key.1.clone(),
                                        branch_a: graph.requirer_chain(node.id),
                                        version_a: slot.get().version.to_string(),
                                        branch_b: graph.requirer_chain(pin.declarer),
                                        version_b: pin.version.to_string(),
                                    });
                                }
                                if slot.get_mut().covered.insert(covered) {
                                    changed = true;
                                }
                            }
                            Entry::Vacant(slot) => {
                                slot.insert(LateOverride {
                                    version: pin.version.clone(),
                                    user: pin.user.clone(),
                                    channel: pin.channel.clone(),
                                    revision: pin.revision.clone(),
                                    covered: BTreeSet::from([covered]),
                                });
                                changed = true;
                            }
                        }
                    }
                }
            }
        }
        Ok(changed)
    }

    /// True when a lockfile pin outranks overrides for this requirer's
    /// own requirement of the package
    fn lock_outranks(
        &self,
        graph: &DependencyGraph,
        requirer: NodeId,
        key: &(Context, String),
    ) -> Result<bool> {
        let Some(lock) = self.lockfile else {
            return Ok(false);
        };
        let node = graph.node(requirer);
        let requirement = node
            .recipe
            .requirements
            .iter()
            .find(|r| !r.is_override && r.spec.name == key.1);
        match requirement {
            Some(requirement) => Ok(lock
                .pin_matching(&requirement.spec, key.0, &node.reference.to_string())?
                .is_some()),
            None => Ok(false),
        }
    }
}

fn make_edge(requirement: &Requirement, target: NodeId) -> DepEdge {
    DepEdge {
        target,
        visibility: requirement.visibility,
        kind: requirement.kind,
        context: requirement.context,
        expression: requirement.spec.version.to_string(),
    }
}

/// A warning naming the discarded version, when the pin changed anything
fn replacement_warning(
    requirement: &Requirement,
    requirer_ref: &Reference,
    pinned: &Version,
) -> Result<Option<ResolutionWarning>> {
    let previous = match &requirement.spec.version {
        VersionSpec::Exact(v) if v != pinned => v.to_string(),
        VersionSpec::Range(expr)
            if !version::validate(expr, pinned, &requirer_ref.to_string())? =>
        {
            format!("[{}]", expr)
        }
        _ => return Ok(None),
    };
    Ok(Some(ResolutionWarning {
        package: requirement.spec.name.clone(),
        requirer: requirer_ref.to_string(),
        previous,
        replacement: pinned.to_string(),
    }))
}

/// True when the pin's declarer is the requirer itself or one of its
/// ancestors
fn pin_applies(graph: &DependencyGraph, declarer: NodeId, requirer: NodeId) -> bool {
    declarer == requirer || graph.transitive_dependents(requirer).contains(&declarer)
}

/// Record a forced version; the first force for a key wins
fn register_forced(
    forced: &mut HashMap<(Context, String), ForcedPin>,
    key: (Context, String),
    reference: &Reference,
) -> bool {
    match forced.entry(key) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(ForcedPin {
                version: reference.version.clone(),
                user: reference.user.clone(),
                channel: reference.channel.clone(),
                revision: reference.revision.clone(),
            });
            true
        }
    }
}

/// Render the cycle from `from` down to `to` and back again
fn cycle_string(graph: &DependencyGraph, from: NodeId, to: NodeId) -> String {
    let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
    let mut queue = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        if current == to {
            break;
        }
        for edge in &graph.node(current).dependencies {
            if edge.target != from && !parent.contains_key(&edge.target) {
                parent.insert(edge.target, current);
                queue.push_back(edge.target);
            }
        }
    }

    let mut path = vec![to];
    let mut current = to;
    while current != from {
        match parent.get(&current) {
            Some(&p) => {
                path.push(p);
                current = p;
            }
            None => break,
        }
    }
    path.reverse();

    let mut names: Vec<String> = path
        .iter()
        .map(|id| graph.node(*id).reference.to_string())
        .collect();
    names.push(graph.node(from).reference.to_string());
    names.join(" -> ")
}

/// Two different packages claiming one capability is never reconcilable
fn check_provides(graph: &DependencyGraph) -> Result<()> {
    let mut providers: BTreeMap<(Context, String), BTreeSet<String>> = BTreeMap::new();
    for node in graph.nodes() {
        let own = std::iter::once(node.reference.name.clone());
        for capability in own.chain(node.recipe.provides.iter().cloned()) {
            providers
                .entry((node.context, capability))
                .or_default()
                .insert(node.reference.name.clone());
        }
    }
    for ((_, capability), names) in providers {
        if names.len() > 1 {
            return Err(Error::ProvidesConflict {
                capability,
                providers: names.into_iter().collect(),
            });
        }
    }
    Ok(())
}
