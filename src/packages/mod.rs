// src/packages/mod.rs

//! Package artifact support
//!
//! Readers pull the embedded metadata block and the file manifest out of a
//! built package artifact, independently of any repository. Each format
//! implements the `PackageFormat` trait.

pub mod arch;
pub mod traits;

pub use arch::ArchPackage;
pub use traits::{PackageFormat, PackageMetadata};
