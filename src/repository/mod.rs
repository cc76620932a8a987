// src/repository/mod.rs

//! Repository index maintenance
//!
//! A repository update runs four stages against one temporary
//! [`DescriptorStore`]:
//!
//! 1. extract the existing index archive (a missing one starts empty)
//! 2. ingest new artifacts, in parallel
//! 3. reconcile: keep the newest version per name, apply deletions
//! 4. pack the metadata (`.db`) and full (`.files`) indexes
//!
//! Any failure aborts the update before either output archive is replaced.
//! The update does not lock the repository; callers that may run
//! concurrently against the same archive take a [`RepositoryLock`] first.

pub mod desc;
pub mod index;
pub mod lock;
pub mod reconcile;
pub mod store;

pub use index::{IndexPacker, IndexVariant, read_index};
pub use lock::RepositoryLock;
pub use reconcile::{DuplicateVersion, ReconcilePass, RemovalLedger};
pub use store::DescriptorStore;

use crate::compression::ZstdSettings;
use crate::error::{Error, Result, UpdateStage};
use crate::packages::{ArchPackage, PackageFormat, PackageMetadata};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One package version as recorded in the repository
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryEntry {
    /// Artifact file name, recorded as `%FILENAME%`
    pub filename: String,
    pub metadata: PackageMetadata,
    /// File manifest, present in the full index only
    pub files: Option<Vec<String>>,
}

impl RepositoryEntry {
    /// Build an entry from an opened artifact
    pub fn from_package<P: PackageFormat>(package: &P, with_files: bool) -> Result<Self> {
        let files = if with_files {
            Some(package.file_manifest()?)
        } else {
            None
        };

        Ok(Self {
            filename: package.filename().to_string(),
            metadata: package.metadata().clone(),
            files,
        })
    }

    /// Store directory name
    pub fn entry_name(&self) -> String {
        self.metadata.entry_name()
    }
}

/// Knobs for [`update_repository`]
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Metadata index output; derived from the existing archive when `None`
    pub db_path: Option<PathBuf>,
    /// Full index output; derived from the existing archive when `None`
    pub files_path: Option<PathBuf>,
    /// zstd level, clamped to 1..=22
    pub compression_level: i32,
    /// Worker threads for ingestion and compression; 0 means all cores
    pub threads: usize,
    /// Fail instead of warning when two entries carry equal versions
    pub strict_duplicates: bool,
    /// Parent directory of the temporary store
    pub work_dir: Option<PathBuf>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            db_path: None,
            files_path: None,
            compression_level: 19,
            threads: 0,
            strict_duplicates: false,
            work_dir: None,
        }
    }
}

impl UpdateOptions {
    fn zstd_settings(&self) -> ZstdSettings {
        ZstdSettings {
            level: self.compression_level,
            workers: self.threads,
        }
    }
}

/// Outcome of a successful update
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub db_path: PathBuf,
    pub files_path: PathBuf,
    /// Artifact filenames that left the repository, sorted
    pub removed: Vec<String>,
    pub duplicates: Vec<DuplicateVersion>,
    /// Store entries written for the new artifacts
    pub added: Vec<String>,
    /// Entries in the packed indexes
    pub packages: usize,
}

const ARCHIVE_SUFFIXES: &[&str] = &[".tar.zst", ".tar.gz", ".tar.xz"];

/// Default `.db` and `.files` paths next to an existing archive
///
/// `core.files`, `core.db.tar.zst` and `core` all map to
/// `core.db` / `core.files`.
pub fn output_paths(existing: &Path) -> (PathBuf, PathBuf) {
    let (stem, _) = index_stem(existing);
    (
        existing.with_file_name(format!("{}.db", stem)),
        existing.with_file_name(format!("{}.files", stem)),
    )
}

/// Repository stem of an archive path, and whether it names a `.db` index
fn index_stem(path: &Path) -> (String, bool) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut stem = name.as_str();
    for suffix in ARCHIVE_SUFFIXES {
        if let Some(s) = stem.strip_suffix(suffix) {
            stem = s;
            break;
        }
    }

    if let Some(s) = stem.strip_suffix(".db") {
        return (s.to_string(), true);
    }
    (stem.strip_suffix(".files").unwrap_or(stem).to_string(), false)
}

/// Archive to extract for an update of `existing`
///
/// Only the full index carries file manifests, so a `.db` path is swapped
/// for its sibling `.files` archive. A non-empty `.db` without that sibling
/// is refused rather than repacked into a full index missing every manifest.
fn source_archive(existing: &Path) -> Result<PathBuf> {
    if !index_stem(existing).1 {
        return Ok(existing.to_path_buf());
    }

    let (_, files) = output_paths(existing);
    if files.exists() {
        info!(
            "{} is a metadata index, reading {} instead",
            existing.display(),
            files.display()
        );
        return Ok(files);
    }

    match fs::metadata(existing) {
        Ok(meta) if meta.len() > 0 => Err(Error::ArchiveRead {
            path: existing.to_path_buf(),
            reason: format!(
                "metadata index carries no file manifests and {} does not exist",
                files.display()
            ),
        }),
        _ => Ok(files),
    }
}

/// Read every artifact and write its entry into the store
///
/// All artifacts are read before anything is written, so a malformed
/// artifact or a conflicting pair leaves the store as extracted.
///
/// Returns the new entry names and the artifact filenames of any existing
/// entries that were overwritten by a differently named artifact.
fn ingest(
    store: &DescriptorStore,
    artifacts: &[PathBuf],
    threads: usize,
) -> Result<(Vec<String>, Vec<String>)> {
    if artifacts.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("pkgindex-ingest-{}", i))
        .build()
        .map_err(|e| Error::InitError(format!("Failed to build ingest thread pool: {}", e)))?;

    let entries: Vec<RepositoryEntry> = pool.install(|| {
        artifacts
            .par_iter()
            .map(|path| {
                debug!("Reading artifact {}", path.display());
                let package = ArchPackage::open(path)?;
                RepositoryEntry::from_package(&package, true)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let mut seen: HashMap<String, &str> = HashMap::new();
    for entry in &entries {
        if let Some(first) = seen.insert(entry.entry_name(), &entry.filename) {
            return Err(Error::ConflictingArtifacts {
                entry: entry.entry_name(),
                first: first.to_string(),
                second: entry.filename.clone(),
            });
        }
    }

    let displaced: Vec<Option<String>> = pool.install(|| {
        entries
            .par_iter()
            .map(|entry| store.write_entry(entry))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut added: Vec<String> = entries.iter().map(RepositoryEntry::entry_name).collect();
    added.sort();
    info!("Ingested {} artifact(s)", added.len());
    Ok((added, displaced.into_iter().flatten().collect()))
}

/// Update a repository
///
/// Extracts `existing` (missing or empty means a new repository), adds the
/// artifacts, drops every version of each name in `delete`, keeps only the
/// newest remaining version of each package and packs the `.db` and `.files`
/// indexes. Errors are tagged with the [`UpdateStage`] that failed; on error
/// neither output archive has been replaced.
pub fn update_repository(
    existing: &Path,
    artifacts: &[PathBuf],
    delete: &[String],
    options: &UpdateOptions,
) -> Result<UpdateReport> {
    let (default_db, default_files) = output_paths(existing);
    let db_path = options.db_path.clone().unwrap_or(default_db);
    let files_path = options.files_path.clone().unwrap_or(default_files);

    info!(
        "Updating repository {} ({} new artifact(s), {} deletion(s))",
        existing.display(),
        artifacts.len(),
        delete.len()
    );

    let store = source_archive(existing)
        .and_then(|source| DescriptorStore::extract(&source, options.work_dir.as_deref()))
        .map_err(|e| e.at_stage(UpdateStage::Extract))?;

    let (added, displaced) = ingest(&store, artifacts, options.threads)
        .map_err(|e| e.at_stage(UpdateStage::Ingest))?;

    let mut ledger = ReconcilePass::new(delete.iter().cloned())
        .strict_duplicates(options.strict_duplicates)
        .run(&store)
        .map_err(|e| e.at_stage(UpdateStage::Reconcile))?;
    for filename in &displaced {
        ledger.record(filename);
    }

    let packages = store
        .entry_names()
        .and_then(|names| {
            IndexPacker::new(options.zstd_settings()).pack_both(&store, &db_path, &files_path)?;
            Ok(names.len())
        })
        .map_err(|e| e.at_stage(UpdateStage::Pack))?;

    let (removed, duplicates) = ledger.into_parts();
    info!(
        "Repository now holds {} package(s); {} artifact(s) obsolete",
        packages,
        removed.len()
    );

    Ok(UpdateReport {
        db_path,
        files_path,
        removed,
        duplicates,
        added,
        packages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_paths() {
        let cases = [
            ("/srv/core.files", "/srv/core.db", "/srv/core.files"),
            ("/srv/core.db", "/srv/core.db", "/srv/core.files"),
            ("/srv/core.files.tar.zst", "/srv/core.db", "/srv/core.files"),
            ("/srv/core.db.tar.gz", "/srv/core.db", "/srv/core.files"),
            ("core", "core.db", "core.files"),
            ("/srv/my.repo.files", "/srv/my.repo.db", "/srv/my.repo.files"),
        ];

        for (input, db, files) in cases {
            let (d, f) = output_paths(Path::new(input));
            assert_eq!(d, PathBuf::from(db), "db path for {}", input);
            assert_eq!(f, PathBuf::from(files), "files path for {}", input);
        }
    }

    #[test]
    fn test_source_archive_prefers_full_index() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("core.db");
        let files = dir.path().join("core.files");

        // Nothing exists yet: bootstrap from the full index path.
        assert_eq!(source_archive(&db).unwrap(), files);

        fs::write(&db, b"metadata").unwrap();
        assert!(matches!(source_archive(&db), Err(Error::ArchiveRead { .. })));

        fs::write(&files, b"full").unwrap();
        assert_eq!(source_archive(&db).unwrap(), files);
        assert_eq!(source_archive(&files).unwrap(), files);
    }

    #[test]
    fn test_update_options_default() {
        let options = UpdateOptions::default();
        assert_eq!(options.compression_level, 19);
        assert_eq!(options.threads, 0);
        assert!(!options.strict_duplicates);
        assert_eq!(options.zstd_settings().level, 19);
    }

    #[test]
    fn test_empty_update_bootstraps_empty_repository() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("new.files");

        let report = update_repository(&existing, &[], &[], &UpdateOptions::default()).unwrap();

        assert_eq!(report.packages, 0);
        assert!(report.removed.is_empty());
        assert!(report.db_path.is_file());
        assert!(report.files_path.is_file());
        assert!(read_index(&report.files_path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_artifact_fails_in_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("core.files");
        let artifacts = vec![dir.path().join("ghost-1.0-1-any.pkg.tar.zst")];

        let err = update_repository(&existing, &artifacts, &[], &UpdateOptions::default()).unwrap_err();

        assert_eq!(err.stage(), Some(UpdateStage::Ingest));
        assert!(!dir.path().join("core.db").exists());
    }
}
