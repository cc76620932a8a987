// src/error.rs

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Core error types for pkgindex
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Package artifact is unreadable or lacks its metadata member
    #[error("Malformed artifact {}: {reason}", path.display())]
    MalformedArtifact { path: PathBuf, reason: String },

    /// Store entry is missing a required tag or carries an invalid value
    #[error("Malformed descriptor {entry}: {reason}")]
    MalformedDescriptor { entry: String, reason: String },

    /// Existing repository archive is present but cannot be unpacked
    #[error("Failed to read repository archive {}: {reason}", path.display())]
    ArchiveRead { path: PathBuf, reason: String },

    /// Output archive could not be written or moved into place
    #[error("Failed to write repository archive {}: {reason}", path.display())]
    ArchiveWrite { path: PathBuf, reason: String },

    /// Two entries of one package compare equal under version ordering
    #[error("Duplicate version for package {name}: {duplicate} compares equal to {kept}")]
    DuplicateVersion {
        name: String,
        kept: String,
        duplicate: String,
    },

    /// Two artifacts in one batch map to the same store directory
    #[error("Artifacts {first} and {second} both map to store entry {entry}")]
    ConflictingArtifacts {
        entry: String,
        first: String,
        second: String,
    },

    /// Repository is locked by another writer
    #[error("Repository is locked by process {pid} (lock file {})", path.display())]
    Locked { path: PathBuf, pid: u32 },

    /// Setup failure (thread pool, temp directory, ...)
    #[error("Initialization failed: {0}")]
    InitError(String),

    /// A repository update stage failed
    #[error("Repository update failed during {stage}: {source}")]
    Stage {
        stage: UpdateStage,
        #[source]
        source: Box<Error>,
    },
}

/// Stages of a repository update, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Extract,
    Ingest,
    Reconcile,
    Pack,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateStage::Extract => "extract",
            UpdateStage::Ingest => "ingest",
            UpdateStage::Reconcile => "reconcile",
            UpdateStage::Pack => "pack",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Tag this error with the update stage it occurred in
    pub fn at_stage(self, stage: UpdateStage) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The update stage this error was raised in, if it was tagged
    pub fn stage(&self) -> Option<UpdateStage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result type alias using pkgindex's Error type
pub type Result<T> = std::result::Result<T, Error>;
