// src/repository/reconcile.rs

//! Reconciliation of the descriptor store
//!
//! After ingestion the store may hold several versions of the same package
//! name. A reconcile pass keeps at most one entry per name, the newest by
//! [`PackageVersion`](crate::version::PackageVersion) ordering, and drops
//! every entry whose name was explicitly requested for deletion. The artifact
//! filenames of all dropped entries are collected in a [`RemovalLedger`].

use crate::error::{Error, Result};
use crate::repository::store::{DescriptorStore, StoredEntry};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Two entries of the same name whose versions compare equal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateVersion {
    pub name: String,
    /// Store entry that was kept
    pub kept: String,
    /// Store entry that was dropped
    pub duplicate: String,
}

/// Artifact filenames whose entries left the repository
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemovalLedger {
    removed: BTreeSet<String>,
    duplicates: Vec<DuplicateVersion>,
}

impl RemovalLedger {
    pub(crate) fn record(&mut self, filename: &str) {
        if !self.removed.insert(filename.to_string()) {
            debug!("{} already recorded in removal ledger", filename);
        }
    }

    /// Removed artifact filenames, sorted and without repeats
    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.removed.iter().map(String::as_str)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.removed.contains(filename)
    }

    pub fn len(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    /// Equal-version pairs found while choosing survivors
    pub fn duplicates(&self) -> &[DuplicateVersion] {
        &self.duplicates
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<DuplicateVersion>) {
        (self.removed.into_iter().collect(), self.duplicates)
    }
}

/// Pick the newest entry of a group
///
/// Releases are ignored when one side has none, so equality is not
/// transitive: `1.0` equals both `1.0-1` and `1.0-2`. On a tie an entry with
/// a release replaces one without, which lets a later, greater release still
/// win. Otherwise the first entry in directory-name order is kept.
fn newest<'a>(group: &[&'a StoredEntry]) -> Option<&'a StoredEntry> {
    let mut best: Option<&'a StoredEntry> = None;
    for &entry in group {
        let Some(current) = best else {
            best = Some(entry);
            continue;
        };

        let (new, old) = (&entry.record.metadata.version, &current.record.metadata.version);
        match new.cmp(old) {
            Ordering::Greater => best = Some(entry),
            Ordering::Equal if old.release.is_empty() && !new.release.is_empty() => {
                best = Some(entry)
            }
            _ => {}
        }
    }
    best
}

/// One reconcile pass over a descriptor store
#[derive(Debug, Clone, Default)]
pub struct ReconcilePass {
    deletions: HashSet<String>,
    strict_duplicates: bool,
}

impl ReconcilePass {
    /// Create a pass that drops every version of the given names
    pub fn new<I, S>(deletions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deletions: deletions.into_iter().map(Into::into).collect(),
            strict_duplicates: false,
        }
    }

    /// Fail with [`Error::DuplicateVersion`] instead of warning on equal versions
    pub fn strict_duplicates(mut self, strict: bool) -> Self {
        self.strict_duplicates = strict;
        self
    }

    /// Reconcile the store in place
    ///
    /// The plan is computed before anything is deleted, so a strict-mode
    /// failure leaves the store untouched.
    pub fn run(&self, store: &DescriptorStore) -> Result<RemovalLedger> {
        let entries = store.entries()?;

        let mut groups: BTreeMap<&str, Vec<&StoredEntry>> = BTreeMap::new();
        for entry in &entries {
            groups
                .entry(entry.record.metadata.name.as_str())
                .or_default()
                .push(entry);
        }

        for name in &self.deletions {
            if !groups.contains_key(name.as_str()) {
                warn!("Package {} is not in the repository, nothing to remove", name);
            }
        }

        let mut ledger = RemovalLedger::default();
        let mut doomed: Vec<&StoredEntry> = Vec::new();
        let mut kept_filenames: HashSet<&str> = HashSet::new();

        for (name, group) in &groups {
            if self.deletions.contains(*name) {
                info!("Removing all {} version(s) of {}", group.len(), name);
                doomed.extend(group.iter().copied());
                continue;
            }

            let Some(survivor) = newest(group) else {
                continue;
            };
            kept_filenames.insert(survivor.record.filename.as_str());

            for entry in group {
                if entry.dir_name == survivor.dir_name {
                    continue;
                }

                if entry.record.metadata.version == survivor.record.metadata.version {
                    warn!(
                        "{} and {} carry the same version of {}, keeping {}",
                        survivor.dir_name, entry.dir_name, name, survivor.dir_name
                    );
                    ledger.duplicates.push(DuplicateVersion {
                        name: name.to_string(),
                        kept: survivor.dir_name.clone(),
                        duplicate: entry.dir_name.clone(),
                    });
                } else {
                    debug!("{} supersedes {}", survivor.dir_name, entry.dir_name);
                }
                doomed.push(*entry);
            }
        }

        if self.strict_duplicates {
            if let Some(dup) = ledger.duplicates.first() {
                return Err(Error::DuplicateVersion {
                    name: dup.name.clone(),
                    kept: dup.kept.clone(),
                    duplicate: dup.duplicate.clone(),
                });
            }
        }

        for entry in doomed {
            store.remove_entry(&entry.dir_name)?;

            let filename = entry.record.filename.as_str();
            if kept_filenames.contains(filename) {
                warn!(
                    "Dropped entry {} shares artifact {} with a kept entry, not listing it as removed",
                    entry.dir_name, filename
                );
                continue;
            }
            ledger.record(filename);
        }

        info!(
            "Reconciled {} package name(s), {} artifact(s) removed",
            groups.len(),
            ledger.len()
        );
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::PackageMetadata;
    use crate::repository::RepositoryEntry;
    use crate::version::PackageVersion;

    fn add(store: &DescriptorStore, name: &str, version: &str) -> String {
        let version = PackageVersion::parse(version);
        let filename = format!("{}-{}-any.pkg.tar.zst", name, version.filename());
        let entry = RepositoryEntry {
            filename: filename.clone(),
            metadata: PackageMetadata {
                name: name.to_string(),
                base: name.to_string(),
                version,
                description: String::new(),
                url: None,
                architecture: "any".to_string(),
                packager: "Tester".to_string(),
                build_date: 0,
                installed_size: 0,
                compressed_size: 0,
                md5sum: String::new(),
                sha256sum: String::new(),
                replaces: Vec::new(),
                groups: Vec::new(),
                depends: Vec::new(),
            },
            files: None,
        };
        store.write_entry(&entry).unwrap();
        filename
    }

    #[test]
    fn test_newest_version_survives() {
        let store = DescriptorStore::create(None).unwrap();
        let old = add(&store, "foo", "1.0-1");
        add(&store, "foo", "1.2-1");
        let mid = add(&store, "foo", "1.1-1");
        add(&store, "bar", "3.0-1");

        let ledger = ReconcilePass::default().run(&store).unwrap();

        assert_eq!(store.entry_names().unwrap(), vec!["bar-3.0-1", "foo-1.2-1"]);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains(&old));
        assert!(ledger.contains(&mid));
        assert!(ledger.duplicates().is_empty());
    }

    #[test]
    fn test_epoch_beats_upstream() {
        let store = DescriptorStore::create(None).unwrap();
        add(&store, "foo", "9.9-1");
        add(&store, "foo", "1:0.1-1");

        ReconcilePass::default().run(&store).unwrap();
        assert_eq!(store.entry_names().unwrap(), vec!["foo-1^0.1-1"]);
    }

    #[test]
    fn test_deletion_removes_all_versions() {
        let store = DescriptorStore::create(None).unwrap();
        let a = add(&store, "foo", "1.0-1");
        let b = add(&store, "foo", "2.0-1");
        add(&store, "bar", "1.0-1");

        let ledger = ReconcilePass::new(["foo"]).run(&store).unwrap();

        assert_eq!(store.entry_names().unwrap(), vec!["bar-1.0-1"]);
        let removed: Vec<&str> = ledger.removed().collect();
        let mut expected = vec![a.as_str(), b.as_str()];
        expected.sort();
        assert_eq!(removed, expected);
    }

    #[test]
    fn test_unknown_deletion_is_not_an_error() {
        let store = DescriptorStore::create(None).unwrap();
        add(&store, "bar", "1.0-1");

        let ledger = ReconcilePass::new(["ghost"]).run(&store).unwrap();
        assert!(ledger.is_empty());
        assert_eq!(store.entry_names().unwrap(), vec!["bar-1.0-1"]);
    }

    #[test]
    fn test_duplicate_versions_are_flagged() {
        let store = DescriptorStore::create(None).unwrap();
        // Releases are skipped when one side has none, so these compare equal.
        add(&store, "foo", "1.0");
        add(&store, "foo", "1.0-1");

        let ledger = ReconcilePass::default().run(&store).unwrap();

        assert_eq!(store.entry_names().unwrap(), vec!["foo-1.0-1"]);
        assert_eq!(
            ledger.duplicates(),
            &[DuplicateVersion {
                name: "foo".to_string(),
                kept: "foo-1.0-1".to_string(),
                duplicate: "foo-1.0".to_string(),
            }]
        );
    }

    #[test]
    fn test_released_tie_lets_greater_release_win() {
        let store = DescriptorStore::create(None).unwrap();
        let bare = add(&store, "foo", "1.0");
        let first = add(&store, "foo", "1.0-1");
        add(&store, "foo", "1.0-2");

        let ledger = ReconcilePass::default().run(&store).unwrap();

        assert_eq!(store.entry_names().unwrap(), vec!["foo-1.0-2"]);
        assert!(ledger.contains(&bare));
        assert!(ledger.contains(&first));
        assert_eq!(ledger.duplicates().len(), 1);
        assert_eq!(ledger.duplicates()[0].duplicate, "foo-1.0");
    }

    #[test]
    fn test_strict_duplicates_leave_store_untouched() {
        let store = DescriptorStore::create(None).unwrap();
        add(&store, "foo", "1.0");
        add(&store, "foo", "1.0-1");
        add(&store, "bar", "1.0-1");
        add(&store, "bar", "2.0-1");

        let result = ReconcilePass::default().strict_duplicates(true).run(&store);

        assert!(matches!(result, Err(Error::DuplicateVersion { .. })));
        assert_eq!(store.entry_names().unwrap().len(), 4);
    }

    #[test]
    fn test_empty_store() {
        let store = DescriptorStore::create(None).unwrap();
        let ledger = ReconcilePass::new(["foo"]).run(&store).unwrap();
        assert!(ledger.is_empty());
    }
}
