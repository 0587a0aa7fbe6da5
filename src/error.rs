// src/error.rs

use thiserror::Error;

/// Core error types for Ingot
///
/// Resolution-time errors (ranges, conflicts, loops) abort graph construction
/// immediately and carry enough context to act on: at least one concrete
/// reference, and for conflicts both competing requirer chains. Missing
/// binaries are accumulated across the whole graph and reported once.
#[derive(Error, Debug)]
pub enum Error {
    /// No candidate version satisfies a range expression
    #[error("No version satisfies range '{expression}' required by {requirer}")]
    NotSatisfiableRange { expression: String, requirer: String },

    /// Two requirement branches resolved the same package to different versions
    #[error(
        "Version conflict for {name}: {branch_a} requires {version_a} but {branch_b} requires {version_b}. \
         Add an override for {name} at the root to resolve the conflict"
    )]
    VersionConflict {
        name: String,
        branch_a: String,
        version_a: String,
        branch_b: String,
        version_b: String,
    },

    /// Two distinct packages claim the same capability in one context
    #[error("Conflicting providers of capability '{}': {}", .capability, .providers.join(", "))]
    ProvidesConflict {
        capability: String,
        providers: Vec<String>,
    },

    /// A requirement closes a cycle on the current expansion path
    #[error("Dependency loop detected: {cycle}")]
    LoopDetected { cycle: String },

    /// Binaries that are neither available nor scheduled to build, aggregated
    /// over the whole graph
    #[error("Missing prebuilt binaries for {} package(s): {}", .missing.len(), .missing.join(", "))]
    MissingBinary { missing: Vec<String> },

    /// A rebuild was requested for a lockfile node that already records a
    /// built package revision
    #[error(
        "Lockfile node {node_id} ({reference}) was already built with package revision {prev}; \
         the lockfile is the source of truth for built packages"
    )]
    AlreadyBuiltLocked {
        node_id: String,
        reference: String,
        prev: String,
    },

    /// Opaque failure surfaced from a recipe or binary collaborator
    #[error("Transport error from {origin}: {detail}")]
    TransportError { origin: String, detail: String },

    /// Reference text that does not follow name/version[@user/channel][#rrev]
    #[error("Invalid reference '{0}'")]
    InvalidReference(String),

    /// Version text that cannot be parsed, even leniently
    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    /// Range expression text that cannot be parsed
    #[error("Invalid version range '{0}'")]
    InvalidRange(String),

    /// A concrete reference for which the provider has no recipe
    #[error("Recipe not found: {0}")]
    RecipeNotFound(String),

    /// Malformed or inconsistent lockfile contents
    #[error("Lockfile error: {0}")]
    LockfileError(String),

    /// Failure to start the bounded worker pool for availability lookups
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// Lockfile or build-order serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using Ingot's Error type
pub type Result<T> = std::result::Result<T, Error>;
