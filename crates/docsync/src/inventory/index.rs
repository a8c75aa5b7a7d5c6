//! Working set of candidate remote files
//!
//! A [`WorkingSet`] maps business keys to the remote file that represents
//! them in the current run. It is built once from the inventory listing and
//! only ever shrinks: every transformation consumes the set and hands back a
//! smaller one together with the entries it took out.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

use crate::naming;

/// One remote file, split into its naming-scheme parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryEntry {
    pub business_key: String,
    pub raw_name: String,
    pub version: String,
}

impl InventoryEntry {
    pub fn from_name(name: impl Into<String>) -> Self {
        let raw_name = name.into();
        let parsed = naming::parse(&raw_name);
        Self {
            business_key: parsed.business_key,
            raw_name,
            version: parsed.version,
        }
    }

    /// Name without extension, as matched against stored titles
    pub fn stem(&self) -> &str {
        naming::stem(&self.raw_name)
    }
}

/// Result of turning a raw listing into a working set
#[derive(Debug, Default)]
pub struct Listing {
    pub set: WorkingSet,
    /// Names without an extension
    pub ignored: Vec<String>,
    /// Entries shadowed by a newer file with the same business key
    pub superseded: Vec<InventoryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    entries: BTreeMap<String, InventoryEntry>,
}

impl WorkingSet {
    /// Build the working set from inventory names
    ///
    /// Names without an extension are not candidates. When several names
    /// share a business key the one with the newest version token wins; on
    /// equal tokens the first listed name is kept.
    pub fn from_listing<I, S>(names: I) -> Listing
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut listing = Listing::default();

        for name in names {
            let name = name.into();
            if naming::extension(&name).is_none() {
                debug!(name = %name, "Ignoring remote name without extension");
                listing.ignored.push(name);
                continue;
            }

            let entry = InventoryEntry::from_name(name);
            let replaces_current = listing
                .set
                .entries
                .get(&entry.business_key)
                .map(|current| {
                    naming::compare_versions(&entry.version, &current.version) == Ordering::Greater
                });

            match replaces_current {
                Some(true) => {
                    if let Some(old) = listing.set.entries.insert(entry.business_key.clone(), entry) {
                        debug!(name = %old.raw_name, "Superseded by newer remote version");
                        listing.superseded.push(old);
                    }
                },
                Some(false) => {
                    debug!(name = %entry.raw_name, "Superseded by newer remote version");
                    listing.superseded.push(entry);
                },
                None => {
                    listing.set.entries.insert(entry.business_key.clone(), entry);
                },
            }
        }

        listing
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, business_key: &str) -> bool {
        self.entries.contains_key(business_key)
    }

    pub fn get(&self, business_key: &str) -> Option<&InventoryEntry> {
        self.entries.get(business_key)
    }

    /// Business keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in ascending business key order
    pub fn entries(&self) -> impl Iterator<Item = &InventoryEntry> {
        self.entries.values()
    }

    /// Split into the entries satisfying `keep` and the rest
    pub fn partition<F>(self, mut keep: F) -> (WorkingSet, Vec<InventoryEntry>)
    where
        F: FnMut(&InventoryEntry) -> bool,
    {
        let (kept, removed): (BTreeMap<_, _>, BTreeMap<_, _>) =
            self.entries.into_iter().partition(|(_, entry)| keep(entry));
        (WorkingSet { entries: kept }, removed.into_values().collect())
    }

    /// Take out the entry for `business_key`, if present
    pub fn remove(mut self, business_key: &str) -> (WorkingSet, Option<InventoryEntry>) {
        let removed = self.entries.remove(business_key);
        (self, removed)
    }

    /// Consume the set, yielding entries in ascending business key order
    pub fn into_entries(self) -> Vec<InventoryEntry> {
        self.entries.into_values().collect()
    }
}
