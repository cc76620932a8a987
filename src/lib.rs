// src/lib.rs

//! pkgindex
//!
//! Maintains a compressed, versioned index of pacman-style packages.
//! Given a previously packed repository archive and a set of newly built
//! package artifacts, an update extracts the index, merges descriptors for
//! the new artifacts, drops superseded or removed versions and repacks the
//! result into a metadata-only (`.db`) and a metadata+files (`.files`)
//! archive, reporting which artifacts became obsolete.
//!
//! # Architecture
//!
//! - `version`: RPM-style version ordering used to decide "latest"
//! - `packages`: reading metadata and file manifests out of artifacts
//! - `repository`: descriptor store, reconciliation, packing, orchestration

pub mod compression;
mod error;
pub mod packages;
pub mod repository;
pub mod version;

pub use error::{Error, Result, UpdateStage};
pub use repository::{UpdateOptions, UpdateReport, update_repository};
pub use version::{PackageVersion, vercmp};
