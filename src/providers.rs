// src/providers.rs

//! Provider traits
//!
//! The resolver is storage-agnostic. Everything it needs from the outside
//! comes through three traits:
//! - `RecipeProvider` looks up recipe metadata and candidate versions
//! - `BinaryAvailability` answers whether a prebuilt binary exists
//! - `CompatibilityProvider` proposes fallback configurations when the
//!   exact binary is absent
//!
//! In-memory implementations back the test suite and small embeddings;
//! real deployments implement the traits over their own stores.

use crate::error::Result;
use crate::package_id::{NodeFacts, PackageId};
use crate::recipe::RecipeMetadata;
use crate::reference::Reference;
use crate::version::Version;
use std::collections::HashMap;

/// Source of recipe metadata
pub trait RecipeProvider {
    /// Fetch the recipe for an exact reference
    ///
    /// A pinned revision must match; `Ok(None)` means not found.
    fn get_recipe(&self, reference: &Reference) -> Result<Option<RecipeMetadata>>;

    /// All known versions of a package, in any order
    fn list_candidate_versions(&self, name: &str) -> Result<Vec<Version>>;
}

/// Where a prebuilt binary was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryLocation {
    /// Already present in the local cache
    Cache,
    /// Downloadable from the named remote
    Remote(String),
    Absent,
}

/// Binary package lookups
///
/// Queries run from worker threads during availability probing, hence the
/// `Send + Sync` bound.
pub trait BinaryAvailability: Send + Sync {
    /// Look for a binary of `reference` built as `package_id`
    fn has_binary(&self, reference: &Reference, package_id: &PackageId)
    -> Result<BinaryLocation>;

    /// Latest recipe revision known server-side, for staleness checks
    fn has_recipe_revision(&self, reference: &Reference) -> Result<Option<String>>;
}

/// Fallback configuration proposals
pub trait CompatibilityProvider: Send + Sync {
    /// Alternative fact sets to probe when the exact binary is absent,
    /// in preference order
    fn propose(&self, facts: &NodeFacts) -> Vec<NodeFacts>;
}

/// Recipe store backed by a `HashMap`, keyed by name and version
#[derive(Debug, Default)]
pub struct MemoryRecipeIndex {
    recipes: HashMap<String, Vec<RecipeMetadata>>,
}

impl MemoryRecipeIndex {
    pub fn new() -> Self {
        MemoryRecipeIndex::default()
    }

    pub fn add(&mut self, recipe: RecipeMetadata) {
        self.recipes.entry(recipe.name.clone()).or_default().push(recipe);
    }
}

impl RecipeProvider for MemoryRecipeIndex {
    fn get_recipe(&self, reference: &Reference) -> Result<Option<RecipeMetadata>> {
        let Some(candidates) = self.recipes.get(&reference.name) else {
            return Ok(None);
        };
        let found = candidates.iter().find(|r| {
            r.version == reference.version
                && r.user == reference.user
                && r.channel == reference.channel
                && match &reference.revision {
                    Some(rev) => r.revision.as_deref() == Some(rev),
                    None => true,
                }
        });
        Ok(found.cloned())
    }

    fn list_candidate_versions(&self, name: &str) -> Result<Vec<Version>> {
        let mut versions: Vec<Version> = self
            .recipes
            .get(name)
            .map(|rs| rs.iter().map(|r| r.version.clone()).collect())
            .unwrap_or_default();
        versions.sort();
        versions.dedup();
        Ok(versions)
    }
}

/// Binary store backed by maps, for tests and local-only setups
#[derive(Debug, Default)]
pub struct MemoryBinaryStore {
    binaries: HashMap<(String, String), BinaryLocation>,
    revisions: HashMap<String, String>,
}

impl MemoryBinaryStore {
    pub fn new() -> Self {
        MemoryBinaryStore::default()
    }

    fn key(reference: &Reference, package_id: &PackageId) -> (String, String) {
        (
            reference.without_revision().to_string(),
            package_id.as_str().to_string(),
        )
    }

    pub fn add_cache_binary(&mut self, reference: &Reference, package_id: &PackageId) {
        self.binaries
            .insert(Self::key(reference, package_id), BinaryLocation::Cache);
    }

    pub fn add_remote_binary(
        &mut self,
        reference: &Reference,
        package_id: &PackageId,
        remote: &str,
    ) {
        self.binaries.insert(
            Self::key(reference, package_id),
            BinaryLocation::Remote(remote.to_string()),
        );
    }

    /// Record the newest recipe revision the server knows for a reference
    pub fn set_recipe_revision(&mut self, reference: &Reference, revision: &str) {
        self.revisions
            .insert(reference.without_revision().to_string(), revision.to_string());
    }
}

impl BinaryAvailability for MemoryBinaryStore {
    fn has_binary(
        &self,
        reference: &Reference,
        package_id: &PackageId,
    ) -> Result<BinaryLocation> {
        Ok(self
            .binaries
            .get(&Self::key(reference, package_id))
            .cloned()
            .unwrap_or(BinaryLocation::Absent))
    }

    fn has_recipe_revision(&self, reference: &Reference) -> Result<Option<String>> {
        Ok(self
            .revisions
            .get(&reference.without_revision().to_string())
            .cloned())
    }
}

/// Compatibility provider that never proposes anything
#[derive(Debug, Default)]
pub struct NoCompatibility;

impl CompatibilityProvider for NoCompatibility {
    fn propose(&self, _facts: &NodeFacts) -> Vec<NodeFacts> {
        Vec::new()
    }
}

/// One setting value permitted to stand in for another
#[derive(Debug, Clone)]
pub struct SettingFallback {
    pub setting: String,
    pub from: String,
    pub to: String,
}

impl SettingFallback {
    pub fn new(setting: &str, from: &str, to: &str) -> Self {
        SettingFallback {
            setting: setting.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Table-driven compatibility: each fallback whose `from` value matches
/// the node yields one proposal with the `to` value substituted
#[derive(Debug, Default)]
pub struct StaticCompatibility {
    fallbacks: Vec<SettingFallback>,
}

impl StaticCompatibility {
    pub fn new(fallbacks: Vec<SettingFallback>) -> Self {
        StaticCompatibility { fallbacks }
    }
}

impl CompatibilityProvider for StaticCompatibility {
    fn propose(&self, facts: &NodeFacts) -> Vec<NodeFacts> {
        let mut proposals = Vec::new();
        for fallback in &self.fallbacks {
            let matches = facts
                .settings
                .get(&fallback.setting)
                .is_some_and(|v| *v == fallback.from);
            if matches {
                let mut alternative = facts.clone();
                alternative
                    .settings
                    .insert(fallback.setting.clone(), fallback.to.clone());
                proposals.push(alternative);
            }
        }
        proposals
    }
}
