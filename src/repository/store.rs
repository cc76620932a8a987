// src/repository/store.rs

//! On-disk descriptor store
//!
//! The store is the working form of a repository during one update: a
//! temporary directory holding one `<name>-<fullversion>/` directory per
//! package version, each with a `desc` record and optionally a `files`
//! record. The directory belongs to the `DescriptorStore` handle and is
//! removed when the handle is dropped, whether or not the update succeeded.

use crate::compression::open_decoder;
use crate::error::{Error, Result};
use crate::repository::RepositoryEntry;
use crate::repository::desc::{self, DESC_RECORD, DescRecord, FILES_RECORD};
use crate::repository::index::IndexVariant;
use std::fs;
use std::io::Write;
use std::path::Path;
use tar::{Archive, Builder, HeaderMode};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Descriptor of one entry currently in the store
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Directory name inside the store
    pub dir_name: String,
    pub record: DescRecord,
    pub has_files: bool,
}

/// Handle on a temporary descriptor store
#[derive(Debug)]
pub struct DescriptorStore {
    dir: TempDir,
}

impl DescriptorStore {
    /// Create an empty store under `work_dir` (system temp dir if `None`)
    pub fn create(work_dir: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".pkgindex-store-");

        let dir = match work_dir {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| Error::InitError(format!("Failed to create store directory: {}", e)))?;

        debug!("Created descriptor store at {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Unpack a repository archive into a fresh store
    ///
    /// A missing or zero-byte archive is a brand-new repository and yields
    /// an empty store.
    pub fn extract(archive: &Path, work_dir: Option<&Path>) -> Result<Self> {
        let store = Self::create(work_dir)?;

        let len = match fs::metadata(archive) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Repository archive {} does not exist, starting empty",
                    archive.display()
                );
                return Ok(store);
            }
            Err(e) => {
                return Err(Error::ArchiveRead {
                    path: archive.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        if len == 0 {
            info!("Repository archive {} is empty, starting empty", archive.display());
            return Ok(store);
        }

        let read_error = |e: std::io::Error| Error::ArchiveRead {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        };

        let reader = open_decoder(archive).map_err(read_error)?;
        Archive::new(reader).unpack(store.root()).map_err(read_error)?;

        info!(
            "Extracted {} into descriptor store ({} entries)",
            archive.display(),
            store.entry_names()?.len()
        );
        Ok(store)
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write an entry's records, replacing any entry with the same name
    ///
    /// Returns the `%FILENAME%` of the replaced entry when it names a
    /// different artifact than `entry`.
    pub fn write_entry(&self, entry: &RepositoryEntry) -> Result<Option<String>> {
        let dir = self.root().join(entry.entry_name());
        let displaced = self.displaced_filename(&dir, entry);
        fs::create_dir_all(&dir)?;

        fs::write(
            dir.join(DESC_RECORD),
            desc::write_desc(&entry.filename, &entry.metadata),
        )?;

        let files_path = dir.join(FILES_RECORD);
        match &entry.files {
            Some(files) => fs::write(&files_path, desc::write_files(files))?,
            None if files_path.exists() => fs::remove_file(&files_path)?,
            None => {}
        }

        debug!("Wrote store entry {}", entry.entry_name());
        Ok(displaced)
    }

    fn displaced_filename(&self, dir: &Path, entry: &RepositoryEntry) -> Option<String> {
        let content = fs::read_to_string(dir.join(DESC_RECORD)).ok()?;
        match desc::parse_desc(&entry.entry_name(), &content) {
            Ok(old) if old.filename != entry.filename => {
                info!(
                    "{} replaces {} as {}",
                    entry.filename,
                    old.filename,
                    entry.entry_name()
                );
                Some(old.filename)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Overwriting unreadable entry {}: {}", entry.entry_name(), e);
                None
            }
        }
    }

    /// Names of all entry directories that carry a `desc` record, sorted
    pub fn entry_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for dirent in fs::read_dir(self.root())? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();

            if !dirent.file_type()?.is_dir() {
                warn!("Ignoring stray file {} in repository", name);
                continue;
            }
            if !dirent.path().join(DESC_RECORD).is_file() {
                warn!("Ignoring entry {} without a desc record", name);
                continue;
            }

            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    /// Read the `desc` record of every entry, in directory-name order
    ///
    /// A missing `files` record is tolerated; a `desc` record lacking a
    /// required tag is an error.
    pub fn entries(&self) -> Result<Vec<StoredEntry>> {
        self.entry_names()?
            .into_iter()
            .map(|dir_name| {
                let dir = self.root().join(&dir_name);
                let content = fs::read_to_string(dir.join(DESC_RECORD))?;
                let record = desc::parse_desc(&dir_name, &content)?;
                let has_files = dir.join(FILES_RECORD).is_file();

                Ok(StoredEntry {
                    dir_name,
                    record,
                    has_files,
                })
            })
            .collect()
    }

    /// Read a full entry, including its file manifest when present
    pub fn load_entry(&self, dir_name: &str) -> Result<RepositoryEntry> {
        let dir = self.root().join(dir_name);
        let content = fs::read_to_string(dir.join(DESC_RECORD))?;
        let record = desc::parse_desc(dir_name, &content)?;

        let files_path = dir.join(FILES_RECORD);
        let files = if files_path.is_file() {
            Some(desc::parse_files(dir_name, &fs::read_to_string(files_path)?)?)
        } else {
            None
        };

        Ok(RepositoryEntry {
            filename: record.filename,
            metadata: record.metadata,
            files,
        })
    }

    /// Delete an entry directory
    pub fn remove_entry(&self, dir_name: &str) -> Result<()> {
        fs::remove_dir_all(self.root().join(dir_name))?;
        debug!("Removed store entry {}", dir_name);
        Ok(())
    }

    /// Serialize the store as a tarball
    ///
    /// Members are `<entry>/`, `<entry>/desc` and, for the full variant,
    /// `<entry>/files`, without any wrapping top-level directory. Entries are
    /// sorted and headers are deterministic so identical stores produce
    /// identical tarballs.
    pub fn write_tar<W: Write>(&self, writer: W, variant: IndexVariant) -> Result<W> {
        let mut builder = Builder::new(writer);
        builder.mode(HeaderMode::Deterministic);
        builder.follow_symlinks(false);

        for name in self.entry_names()? {
            let dir = self.root().join(&name);
            builder.append_dir(&name, &dir)?;
            builder.append_path_with_name(dir.join(DESC_RECORD), format!("{}/{}", name, DESC_RECORD))?;

            let files_path = dir.join(FILES_RECORD);
            if variant == IndexVariant::Full && files_path.is_file() {
                builder.append_path_with_name(&files_path, format!("{}/{}", name, FILES_RECORD))?;
            }
        }

        Ok(builder.into_inner()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::PackageMetadata;
    use crate::version::PackageVersion;

    fn entry(name: &str, version: &str, files: Option<Vec<String>>) -> RepositoryEntry {
        let version = PackageVersion::parse(version);
        RepositoryEntry {
            filename: format!("{}-{}-any.pkg.tar.zst", name, version.filename()),
            metadata: PackageMetadata {
                name: name.to_string(),
                base: name.to_string(),
                version,
                description: format!("The {} package", name),
                url: None,
                architecture: "any".to_string(),
                packager: "Tester".to_string(),
                build_date: 1,
                installed_size: 2,
                compressed_size: 3,
                md5sum: "md5".to_string(),
                sha256sum: "sha".to_string(),
                replaces: Vec::new(),
                groups: Vec::new(),
                depends: Vec::new(),
            },
            files,
        }
    }

    #[test]
    fn test_extract_missing_archive_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::extract(&dir.path().join("nope.files"), Some(dir.path())).unwrap();
        assert!(store.entry_names().unwrap().is_empty());
    }

    #[test]
    fn test_extract_zero_byte_archive_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("core.files");
        fs::write(&archive, b"").unwrap();

        let store = DescriptorStore::extract(&archive, Some(dir.path())).unwrap();
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_extract_corrupt_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("core.files.tar.zst");
        fs::write(&archive, b"garbage garbage garbage").unwrap();

        let result = DescriptorStore::extract(&archive, Some(dir.path()));
        assert!(matches!(result, Err(Error::ArchiveRead { .. })));
    }

    #[test]
    fn test_write_and_read_entries() {
        let store = DescriptorStore::create(None).unwrap();
        let files = vec!["usr/".to_string(), "usr/bin/foo".to_string()];
        store.write_entry(&entry("foo", "1:1.0-1", Some(files.clone()))).unwrap();
        store.write_entry(&entry("bar", "2.0-1", None)).unwrap();

        assert_eq!(store.entry_names().unwrap(), vec!["bar-2.0-1", "foo-1^1.0-1"]);

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].has_files);
        assert!(entries[1].has_files);
        assert_eq!(entries[1].record.metadata.version.canonical(), "1:1.0-1");

        let loaded = store.load_entry("foo-1^1.0-1").unwrap();
        assert_eq!(loaded.files, Some(files));
    }

    #[test]
    fn test_rewrite_reports_displaced_artifact() {
        let store = DescriptorStore::create(None).unwrap();
        let first = entry("foo", "1.0-1", None);
        assert_eq!(store.write_entry(&first).unwrap(), None);
        assert_eq!(store.write_entry(&first).unwrap(), None);

        let mut rebuilt = entry("foo", "1.0-1", None);
        rebuilt.filename = "foo-1.0-1-x86_64.pkg.tar.zst".to_string();
        assert_eq!(
            store.write_entry(&rebuilt).unwrap(),
            Some("foo-1.0-1-any.pkg.tar.zst".to_string())
        );
        assert_eq!(store.entries().unwrap()[0].record.filename, rebuilt.filename);
    }

    #[test]
    fn test_rewrite_drops_stale_files_record() {
        let store = DescriptorStore::create(None).unwrap();
        store.write_entry(&entry("foo", "1.0-1", Some(vec!["a".to_string()]))).unwrap();
        store.write_entry(&entry("foo", "1.0-1", None)).unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].has_files);
    }

    #[test]
    fn test_entries_skip_dirs_without_desc() {
        let store = DescriptorStore::create(None).unwrap();
        store.write_entry(&entry("foo", "1.0-1", None)).unwrap();
        fs::create_dir(store.root().join("leftover")).unwrap();
        fs::write(store.root().join("README"), "hi").unwrap();

        assert_eq!(store.entry_names().unwrap(), vec!["foo-1.0-1"]);
    }

    #[test]
    fn test_malformed_desc_is_an_error() {
        let store = DescriptorStore::create(None).unwrap();
        let dir = store.root().join("broken-1.0-1");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(DESC_RECORD), "%NAME%\nbroken\n\n").unwrap();

        assert!(matches!(
            store.entries(),
            Err(Error::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn test_remove_entry() {
        let store = DescriptorStore::create(None).unwrap();
        store.write_entry(&entry("foo", "1.0-1", None)).unwrap();
        store.remove_entry("foo-1.0-1").unwrap();
        assert!(store.entry_names().unwrap().is_empty());
    }

    #[test]
    fn test_store_directory_removed_on_drop() {
        let store = DescriptorStore::create(None).unwrap();
        let root = store.root().to_path_buf();
        assert!(root.is_dir());
        drop(store);
        assert!(!root.exists());
    }

    #[test]
    fn test_write_tar_members() {
        let store = DescriptorStore::create(None).unwrap();
        store.write_entry(&entry("foo", "1.0-1", Some(vec!["x".to_string()]))).unwrap();

        let members = |variant| {
            let tar = store.write_tar(Vec::new(), variant).unwrap();
            let mut archive = Archive::new(tar.as_slice());
            archive
                .entries()
                .unwrap()
                .map(|e| {
                    String::from_utf8_lossy(&e.unwrap().path_bytes())
                        .trim_end_matches('/')
                        .to_string()
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(members(IndexVariant::Full), vec!["foo-1.0-1", "foo-1.0-1/desc", "foo-1.0-1/files"]);
        assert_eq!(members(IndexVariant::Metadata), vec!["foo-1.0-1", "foo-1.0-1/desc"]);
    }
}
