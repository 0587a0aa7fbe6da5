// tests/integration_test.rs

//! Integration tests for Ingot
//!
//! These tests drive full pipelines across modules: graph expansion,
//! package id computation, binary status resolution, lockfile capture
//! and replay, and build order planning.

use ingot::binary::{resolve_binaries, BuildPolicy, ResolveConfig};
use ingot::graph::{BinaryStatus, DependencyGraph, GraphBuilder};
use ingot::lockfile::Lockfile;
use ingot::package_id::{compute_graph_ids, ModePolicy, PackageIdMode};
use ingot::plan::plan;
use ingot::profile::{combined_digest, Profile};
use ingot::providers::{
    MemoryBinaryStore, MemoryRecipeIndex, NoCompatibility, SettingFallback, StaticCompatibility,
};
use ingot::recipe::{Context, RecipeMetadata, Requirement};
use ingot::reference::RefSpec;
use ingot::version::Version;
use ingot::Error;
use tempfile::NamedTempFile;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn recipe(name: &str, version: &str) -> RecipeMetadata {
    RecipeMetadata::new(name, version).unwrap()
}

fn exact(name: &str, version: &str) -> RefSpec {
    RefSpec::exact(name, Version::parse(version).unwrap())
}

/// app -> libpng (range) -> zlib (range), with cmake as libpng's build tool
fn sample_index() -> MemoryRecipeIndex {
    let mut index = MemoryRecipeIndex::new();
    index.add(
        recipe("libpng", "1.6.40")
            .with_requirement(Requirement::runtime(RefSpec::range("zlib", ">=1.2 <2.0")))
            .with_requirement(Requirement::build(exact("cmake", "3.27.0"))),
    );
    index.add(recipe("zlib", "1.2.11"));
    index.add(recipe("zlib", "1.2.13"));
    index.add(recipe("cmake", "3.27.0"));
    index
}

fn sample_root() -> RecipeMetadata {
    recipe("app", "0.1.0").with_requirement(Requirement::runtime(RefSpec::range("libpng", "~1.6")))
}

fn resolve(index: &MemoryRecipeIndex, root: &RecipeMetadata) -> DependencyGraph {
    GraphBuilder::new(index)
        .build(root, &Profile::new(), &Profile::new())
        .unwrap()
}

#[test]
fn test_full_pipeline_from_recipes_to_build_order() {
    init_logging();
    let index = sample_index();
    let root = sample_root();
    let host = Profile::new().with_setting("os", "Linux");
    let build = Profile::new().with_setting("os", "Linux");

    // Expand the graph under both profiles
    let mut graph = GraphBuilder::new(&index).build(&root, &host, &build).unwrap();
    assert_eq!(graph.len(), 4, "app, libpng, zlib plus the cmake tool");
    assert_eq!(graph.host_nodes().len(), 2);
    assert_eq!(graph.build_nodes().len(), 1);

    // Publish a binary for zlib only, so everything else must build
    compute_graph_ids(&mut graph, &ModePolicy::default());
    let zlib = graph.find("zlib", Context::Host).unwrap();
    let mut store = MemoryBinaryStore::new();
    {
        let node = graph.node(zlib);
        store.add_cache_binary(&node.reference, node.package_id.as_ref().unwrap());
    }

    let config = ResolveConfig::new()
        .with_policy(BuildPolicy::Missing)
        .with_workers(2);
    resolve_binaries(&mut graph, &config, &store, &NoCompatibility, None).unwrap();

    assert_eq!(graph.node(zlib).binary_status, BinaryStatus::Cache);
    let libpng = graph.find("libpng", Context::Host).unwrap();
    assert_eq!(graph.node(libpng).binary_status, BinaryStatus::Build);
    let cmake = graph.find("cmake", Context::Build).unwrap();
    assert_eq!(graph.node(cmake).binary_status, BinaryStatus::Build);
    assert_eq!(graph.node(graph.root()).binary_status, BinaryStatus::Build);

    // Lock the result and derive a build order from it
    let lock = Lockfile::capture(&graph, &combined_digest(&host, &build));
    assert_eq!(lock.nodes.len(), 4);
    lock.check_profile(&host, &build).unwrap();

    let order = plan(&graph, Some(&lock)).unwrap();
    let refs: Vec<Vec<&str>> = order
        .levels
        .iter()
        .map(|level| level.iter().map(|e| e.reference.as_str()).collect())
        .collect();
    assert_eq!(refs, vec![vec!["cmake/3.27.0"], vec!["libpng/1.6.40"]]);
}

#[test]
fn test_lockfile_round_trip_through_a_file() {
    init_logging();
    let index = sample_index();
    let root = sample_root();
    let host = Profile::new().with_setting("os", "Linux");
    let build = Profile::new();

    let mut graph = GraphBuilder::new(&index).build(&root, &host, &build).unwrap();
    compute_graph_ids(&mut graph, &ModePolicy::default());
    let lock = Lockfile::capture(&graph, &combined_digest(&host, &build));

    // Write the lockfile to disk and read it back
    let temp_file = NamedTempFile::new().unwrap();
    std::fs::write(temp_file.path(), lock.to_json().unwrap()).unwrap();
    let text = std::fs::read_to_string(temp_file.path()).unwrap();
    let reloaded = Lockfile::from_json(&text).unwrap();
    assert_eq!(reloaded, lock);

    // The reloaded lockfile still drives resolution
    reloaded.check_profile(&host, &build).unwrap();
    let replayed = GraphBuilder::new(&index)
        .with_lockfile(&reloaded)
        .build(&root, &host, &build)
        .unwrap();
    assert_eq!(replayed.len(), graph.len());
}

#[test]
fn test_lockfile_pins_ranges_against_newer_uploads() {
    init_logging();
    let mut index = sample_index();
    let root = sample_root();

    let graph = resolve(&index, &root);
    let lock = Lockfile::capture(
        &graph,
        &combined_digest(&Profile::new(), &Profile::new()),
    );

    // A newer zlib appears after the lockfile was written
    index.add(recipe("zlib", "1.2.99"));

    let fresh = resolve(&index, &root);
    let fresh_zlib = fresh.node(fresh.find("zlib", Context::Host).unwrap());
    assert_eq!(fresh_zlib.reference.version.to_string(), "1.2.99");

    let locked = GraphBuilder::new(&index)
        .with_lockfile(&lock)
        .build(&root, &Profile::new(), &Profile::new())
        .unwrap();
    let locked_zlib = locked.node(locked.find("zlib", Context::Host).unwrap());
    assert_eq!(
        locked_zlib.reference.version.to_string(),
        "1.2.13",
        "Locked resolution should ignore versions uploaded later"
    );
}

#[test]
fn test_partial_build_resumes_where_it_stopped() {
    init_logging();
    let index = sample_index();
    let root = sample_root();
    let mut graph = resolve(&index, &root);

    // No binaries anywhere: libpng, zlib and cmake all build
    let config = ResolveConfig::new()
        .with_policy(BuildPolicy::Missing)
        .with_workers(2);
    resolve_binaries(
        &mut graph,
        &config,
        &MemoryBinaryStore::new(),
        &NoCompatibility,
        None,
    )
    .unwrap();

    let mut lock = Lockfile::capture(
        &graph,
        &combined_digest(&Profile::new(), &Profile::new()),
    );
    let full = plan(&graph, Some(&lock)).unwrap();
    assert_eq!(full.levels.len(), 2);

    // Build the first level, then replan: the remainder is exactly the
    // suffix of the original order
    for entry in &full.levels[0] {
        lock.record_built(&entry.lock_node_id, "prev-1").unwrap();
    }
    let rest = plan(&graph, Some(&lock)).unwrap();
    assert_eq!(rest.levels, full.levels[1..].to_vec());

    for entry in &rest.levels[0] {
        lock.record_built(&entry.lock_node_id, "prev-2").unwrap();
    }
    let done = plan(&graph, Some(&lock)).unwrap();
    assert!(done.is_empty(), "Nothing left once every level is built");
}

#[test]
fn test_root_override_steers_and_warns_end_to_end() {
    init_logging();
    let mut index = MemoryRecipeIndex::new();
    index.add(
        recipe("libpng", "1.6.40").with_requirement(Requirement::runtime(exact("zlib", "1.2.13"))),
    );
    index.add(recipe("zlib", "1.2.11"));
    index.add(recipe("zlib", "1.2.13"));

    let root = recipe("app", "0.1.0")
        .with_requirement(Requirement::runtime(RefSpec::range("libpng", "~1.6")))
        .with_requirement(Requirement::override_of(exact("zlib", "1.2.11")));
    let graph = resolve(&index, &root);

    let zlib = graph.node(graph.find("zlib", Context::Host).unwrap());
    assert_eq!(zlib.reference.version.to_string(), "1.2.11");

    let warnings = graph.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].package, "zlib");
    assert_eq!(warnings[0].previous, "1.2.13");
    assert_eq!(warnings[0].replacement, "1.2.11");
    assert_eq!(warnings[0].requirer, "libpng/1.6.40");

    // The override survives lockfile replay
    let lock = Lockfile::capture(
        &graph,
        &combined_digest(&Profile::new(), &Profile::new()),
    );
    let replayed = GraphBuilder::new(&index)
        .with_lockfile(&lock)
        .build(&root, &Profile::new(), &Profile::new())
        .unwrap();
    let replayed_zlib = replayed.node(replayed.find("zlib", Context::Host).unwrap());
    assert_eq!(replayed_zlib.reference.version.to_string(), "1.2.11");
}

#[test]
fn test_rebuild_of_locked_built_node_is_fatal() {
    init_logging();
    let index = sample_index();
    let root = sample_root();
    let mut graph = resolve(&index, &root);
    compute_graph_ids(&mut graph, &ModePolicy::default());

    // Everything except zlib has a cached binary
    let mut store = MemoryBinaryStore::new();
    for (name, context) in [("libpng", Context::Host), ("cmake", Context::Build)] {
        let node = graph.node(graph.find(name, context).unwrap());
        store.add_cache_binary(&node.reference, node.package_id.as_ref().unwrap());
    }

    let config = ResolveConfig::new()
        .with_policy(BuildPolicy::Missing)
        .with_workers(2);
    resolve_binaries(&mut graph, &config, &store, &NoCompatibility, None).unwrap();

    // Record zlib as built in the lockfile
    let mut lock = Lockfile::capture(
        &graph,
        &combined_digest(&Profile::new(), &Profile::new()),
    );
    let zlib = graph.find("zlib", Context::Host).unwrap();
    lock.record_built(&zlib.to_string(), "prev-zlib-1").unwrap();

    // Asking for zlib to build again contradicts the lockfile
    let rebuild = ResolveConfig::new()
        .with_policy(BuildPolicy::Patterns(vec!["zlib".to_string()]))
        .with_workers(2);
    let err = resolve_binaries(&mut graph, &rebuild, &store, &NoCompatibility, Some(&lock))
        .unwrap_err();
    match err {
        Error::AlreadyBuiltLocked {
            reference, prev, ..
        } => {
            assert!(reference.starts_with("zlib/"));
            assert_eq!(prev, "prev-zlib-1");
        }
        other => panic!("Expected AlreadyBuiltLocked, got {other}"),
    }
}

#[test]
fn test_private_dependencies_duplicate_and_skip() {
    init_logging();
    let mut index = MemoryRecipeIndex::new();
    index.add(
        recipe("liba", "1.0").with_requirement(Requirement::private(exact("zlib", "1.2.11"))),
    );
    index.add(
        recipe("libb", "1.0").with_requirement(Requirement::private(exact("zlib", "1.2.13"))),
    );
    index.add(recipe("zlib", "1.2.11"));
    index.add(recipe("zlib", "1.2.13"));

    let root = recipe("app", "0.1.0")
        .with_requirement(Requirement::runtime(exact("liba", "1.0")))
        .with_requirement(Requirement::runtime(exact("libb", "1.0")));
    let mut graph = resolve(&index, &root);

    // Each consumer keeps its own private zlib; the versions never meet
    let zlib_count = graph
        .nodes()
        .filter(|n| n.reference.name == "zlib")
        .count();
    assert_eq!(zlib_count, 2);

    // With both consumers cached, neither private zlib is needed
    compute_graph_ids(&mut graph, &ModePolicy::default());
    let mut store = MemoryBinaryStore::new();
    for name in ["liba", "libb"] {
        let node = graph.node(graph.find(name, Context::Host).unwrap());
        store.add_cache_binary(&node.reference, node.package_id.as_ref().unwrap());
    }
    let config = ResolveConfig::new().with_workers(2);
    resolve_binaries(&mut graph, &config, &store, &NoCompatibility, None).unwrap();

    let skipped = graph
        .nodes()
        .filter(|n| n.reference.name == "zlib")
        .all(|n| n.binary_status == BinaryStatus::Skip);
    assert!(skipped, "Private dependencies of cached consumers skip");
}

#[test]
fn test_missing_binaries_reported_in_one_error() {
    init_logging();
    let index = sample_index();
    let root = sample_root();
    let mut graph = resolve(&index, &root);

    let config = ResolveConfig::new().with_workers(2);
    let err = resolve_binaries(
        &mut graph,
        &config,
        &MemoryBinaryStore::new(),
        &NoCompatibility,
        None,
    )
    .unwrap_err();

    match err {
        Error::MissingBinary { missing } => {
            assert_eq!(missing.len(), 3, "Every hole is reported, not just the first");
            assert!(missing.iter().any(|m| m.starts_with("cmake/")));
            assert!(missing.iter().any(|m| m.starts_with("libpng/")));
            assert!(missing.iter().any(|m| m.starts_with("zlib/")));
        }
        other => panic!("Expected MissingBinary, got {other}"),
    }
}

#[test]
fn test_compatible_binary_satisfies_a_different_profile() {
    init_logging();
    let mut index = MemoryRecipeIndex::new();
    index.add(recipe("zlib", "1.2.13").with_relevant_settings(&["build_type"]));
    let root = recipe("app", "0.1.0")
        .with_requirement(Requirement::runtime(exact("zlib", "1.2.13")));

    // Publish a Release binary
    let release = Profile::new().with_setting("build_type", "Release");
    let mut released = GraphBuilder::new(&index)
        .build(&root, &release, &release)
        .unwrap();
    compute_graph_ids(&mut released, &ModePolicy::default());
    let mut store = MemoryBinaryStore::new();
    let release_id = {
        let node = released.node(released.find("zlib", Context::Host).unwrap());
        let id = node.package_id.as_ref().unwrap();
        store.add_cache_binary(&node.reference, id);
        id.as_str().to_string()
    };

    // Resolve under Debug with a Debug -> Release fallback
    let debug = Profile::new().with_setting("build_type", "Debug");
    let mut graph = GraphBuilder::new(&index).build(&root, &debug, &debug).unwrap();
    let compatibility =
        StaticCompatibility::new(vec![SettingFallback::new("build_type", "Debug", "Release")]);
    let config = ResolveConfig::new().with_workers(2);
    resolve_binaries(&mut graph, &config, &store, &compatibility, None).unwrap();

    let zlib = graph.node(graph.find("zlib", Context::Host).unwrap());
    assert_eq!(zlib.binary_status, BinaryStatus::Cache);
    assert_eq!(
        zlib.compatible_package_id.as_ref().unwrap().as_str(),
        release_id
    );

    // The lockfile records the binary that will actually be used
    let lock = Lockfile::capture(&graph, &combined_digest(&debug, &debug));
    let locked = lock
        .nodes
        .values()
        .find(|n| n.reference.starts_with("zlib/"))
        .unwrap();
    assert_eq!(locked.package_id.as_deref(), Some(release_id.as_str()));
}

#[test]
fn test_semver_mode_keeps_consumer_ids_stable() {
    init_logging();
    let mut index = MemoryRecipeIndex::new();
    index.add(
        recipe("libpng", "1.6.40")
            .with_requirement(Requirement::runtime(RefSpec::range("zlib", ">=1.2 <2.0"))),
    );
    index.add(recipe("zlib", "1.2.11"));
    let root = sample_root();

    let mut before = resolve(&index, &root);
    compute_graph_ids(&mut before, &ModePolicy::default());

    // A patch bump of zlib lands
    index.add(recipe("zlib", "1.2.13"));
    let mut after = resolve(&index, &root);
    compute_graph_ids(&mut after, &ModePolicy::default());

    let libpng_before = before.find("libpng", Context::Host).unwrap();
    let libpng_after = after.find("libpng", Context::Host).unwrap();
    assert_eq!(
        after
            .node(after.find("zlib", Context::Host).unwrap())
            .reference
            .version
            .to_string(),
        "1.2.13"
    );
    assert_eq!(
        before.node(libpng_before).package_id,
        after.node(libpng_after).package_id,
        "Under the default mode a patch bump does not change consumer ids"
    );

    // A stricter mode tracks the exact dependency version
    let strict = ModePolicy::new(PackageIdMode::FullVersion);
    compute_graph_ids(&mut before, &strict);
    compute_graph_ids(&mut after, &strict);
    assert_ne!(
        before.node(libpng_before).package_id,
        after.node(libpng_after).package_id
    );
}
