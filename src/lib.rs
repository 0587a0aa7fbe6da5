// src/lib.rs

//! Ingot Dependency Resolver
//!
//! Resolution core for binary package management: recipes declare
//! requirements, profiles fix the configuration, and the resolver turns
//! them into an installable graph.
//!
//! # Architecture
//!
//! - Two-context graphs: host packages link into the product, build
//!   packages are the tools that produce it
//! - Version ranges: requirements resolve against candidate lists, with
//!   overrides and forces reconciling conflicts
//! - Package ids: binaries are fingerprinted from settings, options and
//!   dependency contributions
//! - Lockfiles: resolved graphs replay byte-for-byte, and build orders
//!   come out in parallelizable levels

pub mod binary;
mod error;
pub mod graph;
pub mod lockfile;
pub mod package_id;
pub mod plan;
pub mod profile;
pub mod providers;
pub mod recipe;
pub mod reference;
pub mod version;

pub use error::{Error, Result};
