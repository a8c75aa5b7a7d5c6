//! Reconciliation of the remote inventory against the catalog
//!
//! Classification runs as a fixed sequence of stages over a [`WorkingSet`].
//! Each stage consumes the set and returns what is left plus the entries it
//! classified:
//!
//! 1. listing: remote names become candidates (see [`WorkingSet::from_listing`])
//! 2. key filter: entries without a catalog item are dropped
//! 3. duplicate filter: entries whose stem is already a stored title are dropped
//! 4. version classification: entries with a stored file under the same key
//!    become updates when the remote version is newer than the newest stored
//!    version, and are dropped otherwise
//! 5. remainder: everything left is a create, in business key order
//!
//! Every listed name ends up in exactly one category of the
//! [`ReconcileReport`]. The stage functions are pure; [`Reconciler`] only
//! feeds them with inventory and catalog reads.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogItem, CatalogReader, FileId, ItemId, StoredFile, TitlePattern};
use crate::error::{SyncError, SyncResult};
use crate::inventory::index::Listing;
use crate::inventory::{InventoryEntry, InventorySource, WorkingSet};
use crate::naming;

/// A stored file to overwrite with newer remote content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCandidate {
    pub file_id: FileId,
    pub remote_name: String,
    pub business_key: String,
}

/// A remote file with no stored counterpart, to insert and link to its item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateCandidate {
    pub item_id: ItemId,
    pub remote_name: String,
    pub business_key: String,
}

/// Where every listed name ended up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Names without an extension
    pub ignored: Vec<String>,
    /// Names shadowed by a newer remote file with the same business key
    pub superseded: Vec<String>,
    /// Names whose business key has no catalog item
    pub unmatched: Vec<String>,
    /// Names already stored under the same stem
    pub already_stored: Vec<String>,
    /// Names whose stored counterpart has the same or a newer version
    pub not_newer: Vec<String>,
    pub updates: Vec<UpdateCandidate>,
    pub creates: Vec<CreateCandidate>,
    /// Stored files matched by key prefix whose own key is not a candidate
    pub naming_mismatches: Vec<StoredFile>,
}

impl ReconcileReport {
    pub fn has_work(&self) -> bool {
        !self.updates.is_empty() || !self.creates.is_empty()
    }

    /// Number of listed names accounted for across all categories
    pub fn classified_names(&self) -> usize {
        self.ignored.len()
            + self.superseded.len()
            + self.unmatched.len()
            + self.already_stored.len()
            + self.not_newer.len()
            + self.updates.len()
            + self.creates.len()
    }
}

fn raw_names(entries: Vec<InventoryEntry>) -> Vec<String> {
    entries.into_iter().map(|entry| entry.raw_name).collect()
}

/// Business key to item id lookup
pub fn index_items(items: Vec<CatalogItem>) -> HashMap<String, ItemId> {
    items
        .into_iter()
        .map(|item| (item.item_number, item.item_id))
        .collect()
}

/// Stage 2: keep only entries whose business key names a catalog item
pub fn filter_known_keys(
    set: WorkingSet,
    items: &HashMap<String, ItemId>,
) -> (WorkingSet, Vec<InventoryEntry>) {
    set.partition(|entry| items.contains_key(&entry.business_key))
}

/// Titles that would mark an entry as already stored
pub fn duplicate_pattern(set: &WorkingSet) -> TitlePattern {
    TitlePattern::any_prefix(set.entries().map(InventoryEntry::stem))
}

/// Stage 3: drop entries whose stem is already a stored title
///
/// A stored title counts when its own stem equals the entry's stem, so
/// `item1_1.pdf` covers a remote `item1_1.docx` that was converted on upload.
pub fn filter_duplicates(
    set: WorkingSet,
    stored_titles: &[String],
) -> (WorkingSet, Vec<InventoryEntry>) {
    let stored: BTreeSet<(&str, &str)> = stored_titles
        .iter()
        .map(|title| (naming::business_key(title), naming::stem(title)))
        .collect();

    set.partition(|entry| !stored.contains(&(entry.business_key.as_str(), entry.stem())))
}

/// Stored files that may be older versions of remaining entries
pub fn version_pattern(set: &WorkingSet) -> TitlePattern {
    TitlePattern::any_prefix(set.keys())
}

/// Output of the version classification stage
#[derive(Debug, Default)]
pub struct VersionStage {
    pub remaining: WorkingSet,
    pub updates: Vec<UpdateCandidate>,
    pub not_newer: Vec<InventoryEntry>,
    pub mismatches: Vec<StoredFile>,
}

/// Stage 4: compare the newest stored file of each key with its entry
///
/// Several stored files may share a key. Only the one with the highest
/// version token is compared, so an older stored version can never be
/// overwritten while a newer one exists. On equal versions the lowest id
/// wins. Stored files whose key has no entry left are naming mismatches.
pub fn classify_versions(set: WorkingSet, stored_files: &[StoredFile]) -> VersionStage {
    let mut stage = VersionStage::default();
    let mut newest: BTreeMap<&str, &StoredFile> = BTreeMap::new();

    for stored in stored_files {
        let key = naming::business_key(&stored.title);
        if !set.contains(key) {
            warn!(
                file_id = stored.file_id,
                title = %stored.title,
                "Stored title does not follow the naming scheme of any candidate"
            );
            stage.mismatches.push(stored.clone());
            continue;
        }

        match newest.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(stored);
            },
            Entry::Occupied(mut slot) => {
                let current = *slot.get();
                let ordering = naming::compare_versions(
                    naming::version_token(&stored.title),
                    naming::version_token(&current.title),
                );
                if ordering == Ordering::Greater {
                    debug!(file_id = stored.file_id, replaces = current.file_id, key, "Newer stored version for key");
                    slot.insert(stored);
                } else {
                    debug!(file_id = stored.file_id, kept = current.file_id, key, "Older stored version for key skipped");
                }
            },
        }
    }

    let mut remaining = set;
    for (key, stored) in newest {
        let (rest, entry) = remaining.remove(key);
        remaining = rest;
        let Some(entry) = entry else {
            continue;
        };

        if naming::is_newer(&stored.title, &entry.raw_name) {
            debug!(file_id = stored.file_id, stored = %stored.title, remote = %entry.raw_name, "Remote version is newer");
            stage.updates.push(UpdateCandidate {
                file_id: stored.file_id,
                remote_name: entry.raw_name,
                business_key: entry.business_key,
            });
        } else {
            debug!(stored = %stored.title, remote = %entry.raw_name, "Remote version is not newer");
            stage.not_newer.push(entry);
        }
    }

    stage.remaining = remaining;
    stage
}

/// Stage 5: every remaining entry becomes a create, in business key order
pub fn into_creates(set: WorkingSet, items: &HashMap<String, ItemId>) -> Vec<CreateCandidate> {
    set.into_entries()
        .into_iter()
        .filter_map(|entry| {
            // Entries reaching this stage passed the key filter.
            let item_id = *items.get(&entry.business_key)?;
            Some(CreateCandidate {
                item_id,
                remote_name: entry.raw_name,
                business_key: entry.business_key,
            })
        })
        .collect()
}

/// Runs the classification stages against live sources
pub struct Reconciler<'a> {
    inventory: &'a dyn InventorySource,
    catalog: &'a dyn CatalogReader,
}

impl<'a> Reconciler<'a> {
    pub fn new(inventory: &'a dyn InventorySource, catalog: &'a dyn CatalogReader) -> Self {
        Self { inventory, catalog }
    }

    /// Classify the current inventory
    ///
    /// Only reads: a failure here leaves the catalog untouched.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> SyncResult<ReconcileReport> {
        let listed = self
            .inventory
            .list()
            .await
            .map_err(SyncError::InventoryUnavailable)?;
        info!(listed = listed.len(), "Fetched inventory listing");

        let Listing {
            set,
            ignored,
            superseded,
        } = WorkingSet::from_listing(listed);
        let mut report = ReconcileReport {
            ignored,
            superseded: raw_names(superseded),
            ..ReconcileReport::default()
        };

        let items = index_items(
            self.catalog
                .select_items()
                .await
                .map_err(SyncError::CatalogUnavailable)?,
        );
        let (set, unmatched) = filter_known_keys(set, &items);
        debug!(candidates = set.len(), unmatched = unmatched.len(), "Key filter applied");
        report.unmatched = raw_names(unmatched);

        let stored_titles = self
            .catalog
            .select_file_titles(&duplicate_pattern(&set))
            .await
            .map_err(SyncError::CatalogUnavailable)?;
        let (set, already_stored) = filter_duplicates(set, &stored_titles);
        debug!(candidates = set.len(), already_stored = already_stored.len(), "Duplicate filter applied");
        report.already_stored = raw_names(already_stored);

        if set.is_empty() {
            info!("No candidates left after duplicate filter");
            return Ok(report);
        }

        let stored_files = self
            .catalog
            .select_files(&version_pattern(&set))
            .await
            .map_err(SyncError::CatalogUnavailable)?;
        let stage = classify_versions(set, &stored_files);
        report.updates = stage.updates;
        report.not_newer = raw_names(stage.not_newer);
        report.naming_mismatches = stage.mismatches;
        report.creates = into_creates(stage.remaining, &items);

        info!(
            updates = report.updates.len(),
            creates = report.creates.len(),
            already_stored = report.already_stored.len(),
            not_newer = report.not_newer.len(),
            unmatched = report.unmatched.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }
}
