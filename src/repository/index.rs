// src/repository/index.rs

//! Packing and reading repository index archives
//!
//! A repository is published as two zstd-compressed tarballs built from the
//! same descriptor store: the metadata index (`.db`, `desc` records only) and
//! the full index (`.files`, `desc` and `files` records).

use crate::compression::{ZstdSettings, open_decoder};
use crate::error::{Error, Result};
use crate::repository::RepositoryEntry;
use crate::repository::desc::{self, DESC_RECORD, FILES_RECORD};
use crate::repository::store::DescriptorStore;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Which records an index archive carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVariant {
    /// `desc` records only
    Metadata,
    /// `desc` and `files` records
    Full,
}

impl std::fmt::Display for IndexVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metadata => write!(f, "metadata"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// An index written to a temp file next to its destination, not yet published
#[derive(Debug)]
pub struct StagedArchive {
    temp: NamedTempFile,
    dest: PathBuf,
}

impl StagedArchive {
    /// Pack `store` into a temp file in the destination's directory
    pub fn stage(
        store: &DescriptorStore,
        dest: &Path,
        variant: IndexVariant,
        settings: &ZstdSettings,
    ) -> Result<Self> {
        let write_error = |reason: String| Error::ArchiveWrite {
            path: dest.to_path_buf(),
            reason,
        };

        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| write_error(e.to_string()))?;

        let temp = tempfile::Builder::new()
            .prefix(".pkgindex-")
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|e| write_error(e.to_string()))?;

        let encoder = settings
            .encoder(temp.as_file())
            .map_err(|e| write_error(e.to_string()))?;
        let encoder = store.write_tar(encoder, variant).map_err(|e| match e {
            Error::Io(io) => write_error(io.to_string()),
            other => other,
        })?;
        let file = encoder.finish().map_err(|e| write_error(e.to_string()))?;
        file.sync_all().map_err(|e| write_error(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o644))
                .map_err(|e| write_error(e.to_string()))?;
        }

        debug!(
            "Staged {} index for {} at {}",
            variant,
            dest.display(),
            temp.path().display()
        );
        Ok(Self {
            temp,
            dest: dest.to_path_buf(),
        })
    }

    /// Atomically move the staged archive over its destination
    pub fn commit(self) -> Result<PathBuf> {
        let dest = self.dest;
        self.temp
            .persist(&dest)
            .map_err(|e| Error::ArchiveWrite {
                path: dest.clone(),
                reason: e.error.to_string(),
            })?;

        info!("Wrote {}", dest.display());
        Ok(dest)
    }
}

impl DescriptorStore {
    /// Pack the store into a single index archive at `output`
    pub fn pack(&self, output: &Path, variant: IndexVariant, settings: &ZstdSettings) -> Result<PathBuf> {
        StagedArchive::stage(self, output, variant, settings)?.commit()
    }
}

/// Writes the metadata and full indexes of a store as a pair
#[derive(Debug, Clone, Default)]
pub struct IndexPacker {
    settings: ZstdSettings,
}

impl IndexPacker {
    pub fn new(settings: ZstdSettings) -> Self {
        Self { settings }
    }

    /// Pack both indexes, publishing them only once both are fully written
    ///
    /// If either pack fails, neither destination is touched. The full index
    /// is renamed into place first, so if the second rename fails the
    /// metadata index is left one update behind rather than ahead of the
    /// file manifests.
    pub fn pack_both(&self, store: &DescriptorStore, db_path: &Path, files_path: &Path) -> Result<()> {
        if db_path == files_path {
            return Err(Error::InitError(format!(
                "Metadata and full index cannot share the path {}",
                db_path.display()
            )));
        }

        let db = StagedArchive::stage(store, db_path, IndexVariant::Metadata, &self.settings)?;
        let files = StagedArchive::stage(store, files_path, IndexVariant::Full, &self.settings)?;

        files.commit()?;
        db.commit().inspect_err(|e| {
            warn!(
                "{} was updated but {} was not ({}); the two indexes now differ",
                files_path.display(),
                db_path.display(),
                e
            )
        })?;
        Ok(())
    }
}

/// Read every entry of an index archive
///
/// Works on both variants; entries of a metadata index come back with
/// `files: None`. A zero-byte file is an empty repository.
pub fn read_index(path: &Path) -> Result<Vec<RepositoryEntry>> {
    let read_error = |e: std::io::Error| Error::ArchiveRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    if fs::metadata(path).map_err(read_error)?.len() == 0 {
        return Ok(Vec::new());
    }

    let reader = open_decoder(path).map_err(read_error)?;
    let mut archive = Archive::new(reader);

    // entry name -> (desc, files)
    let mut records: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();

    for member in archive.entries().map_err(read_error)? {
        let mut member = member.map_err(read_error)?;
        if member.header().entry_type().is_dir() {
            continue;
        }

        let member_path = member.path().map_err(read_error)?.to_string_lossy().into_owned();
        let member_path = member_path.strip_prefix("./").unwrap_or(&member_path);
        let Some((entry, record)) = member_path.split_once('/') else {
            continue;
        };
        if record != DESC_RECORD && record != FILES_RECORD {
            continue;
        }
        let (entry, record) = (entry.to_string(), record.to_string());

        let mut content = String::new();
        member.read_to_string(&mut content).map_err(read_error)?;

        let slot = records.entry(entry).or_default();
        if record == DESC_RECORD {
            slot.0 = Some(content);
        } else {
            slot.1 = Some(content);
        }
    }

    records
        .into_iter()
        .map(|(entry, (desc_content, files_content))| {
            let desc_content = desc_content.ok_or_else(|| Error::MalformedDescriptor {
                entry: entry.clone(),
                reason: "missing desc record".to_string(),
            })?;
            let record = desc::parse_desc(&entry, &desc_content)?;
            let files = files_content
                .map(|content| desc::parse_files(&entry, &content))
                .transpose()?;

            Ok(RepositoryEntry {
                filename: record.filename,
                metadata: record.metadata,
                files,
            })
        })
        .collect()
}
