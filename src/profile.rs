// src/profile.rs

//! Build profiles
//!
//! A profile carries the settings (platform facts like os, arch, compiler)
//! and options (per-package switches like shared=True) under which a graph
//! is resolved. Options may be scoped to one package with a `pkg:` prefix;
//! scoped values win over bare ones. Profiles hash to a stable digest so
//! lockfiles can detect being replayed under a different configuration.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Profile {
    pub fn new() -> Self {
        Profile::default()
    }

    pub fn with_setting(mut self, key: &str, value: &str) -> Self {
        self.settings.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_string(), value.to_string());
        self
    }

    /// Settings restricted to the given keys, or all of them when the
    /// recipe does not narrow the set
    pub fn settings_for(&self, relevant: &[String]) -> BTreeMap<String, String> {
        if relevant.is_empty() {
            return self.settings.clone();
        }
        self.settings
            .iter()
            .filter(|(k, _)| relevant.iter().any(|r| r == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Effective options for one package
    ///
    /// Bare keys apply everywhere; `pkg:key` entries override them for
    /// that package only.
    pub fn options_for(&self, package: &str) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for (key, value) in &self.options {
            if !key.contains(':') {
                merged.insert(key.clone(), value.clone());
            }
        }
        let prefix = format!("{}:", package);
        for (key, value) in &self.options {
            if let Some(bare) = key.strip_prefix(&prefix) {
                merged.insert(bare.to_string(), value.clone());
            }
        }
        merged
    }

    /// Stable content hash of the profile
    pub fn digest(&self) -> String {
        let mut text = String::from("[settings]\n");
        for (key, value) in &self.settings {
            text.push_str(&format!("{}={}\n", key, value));
        }
        text.push_str("[options]\n");
        for (key, value) in &self.options {
            text.push_str(&format!("{}={}\n", key, value));
        }
        sha256_hex(&text)
    }
}

/// Digest covering both contexts of a resolution
pub fn combined_digest(host: &Profile, build: &Profile) -> String {
    let text = format!("[host]\n{}\n[build]\n{}\n", host.digest(), build.digest());
    sha256_hex(&text)
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
