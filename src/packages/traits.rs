// src/packages/traits.rs

//! Common types and traits for package artifact readers

use crate::error::Result;
use crate::version::PackageVersion;
use serde::Serialize;
use std::path::Path;

/// Metadata describing one built package artifact
///
/// Constructed once per artifact, either from the artifact's embedded
/// metadata member or from a previously written `desc` record, and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageMetadata {
    pub name: String,
    pub base: String,
    pub version: PackageVersion,
    pub description: String,
    pub url: Option<String>,
    pub architecture: String,
    pub packager: String,
    /// Build time in unix seconds
    pub build_date: u64,
    pub installed_size: u64,
    /// Size of the artifact file itself
    pub compressed_size: u64,
    pub md5sum: String,
    pub sha256sum: String,
    pub replaces: Vec<String>,
    pub groups: Vec<String>,
    pub depends: Vec<String>,
}

impl PackageMetadata {
    /// Store directory name: `<name>-<fullversion>` in filename encoding
    pub fn entry_name(&self) -> String {
        format!("{}-{}", self.name, self.version.filename())
    }
}

/// Common interface for package artifact formats
pub trait PackageFormat {
    /// Open an artifact and read its metadata
    fn open(path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Path the artifact was opened from
    fn path(&self) -> &Path;

    /// Artifact file name, as recorded in `%FILENAME%`
    fn filename(&self) -> &str;

    /// Metadata read from the artifact
    fn metadata(&self) -> &PackageMetadata;

    /// List the files shipped by the artifact, in archive order
    ///
    /// Control members (names beginning with `.`) are excluded.
    fn file_manifest(&self) -> Result<Vec<String>>;
}
