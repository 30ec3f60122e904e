//! Classification of local path changes into remote operations.

use crate::repo::{StatusEntry, StatusKind};
use std::collections::BTreeSet;

/// Remote operations needed to publish a set of local changes.
///
/// Sets are ordered so pushes replay deterministically. Deletes are always
/// applied before uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChangeSet {
    /// Paths to upload.
    pub uploads: BTreeSet<String>,
    /// Paths to delete.
    pub deletes: BTreeSet<String>,
}

impl PendingChangeSet {
    /// Builds a change set from path-status entries.
    ///
    /// A rename becomes a delete of the old path plus an upload of the new
    /// one.
    pub fn from_statuses<'a>(entries: impl IntoIterator<Item = &'a StatusEntry>) -> Self {
        let mut set = Self::default();
        for entry in entries {
            match entry.kind {
                StatusKind::Modified | StatusKind::Added => {
                    set.uploads.insert(entry.path.clone());
                }
                StatusKind::Deleted => {
                    set.deletes.insert(entry.path.clone());
                }
                StatusKind::Renamed => {
                    set.deletes.insert(entry.path.clone());
                    if let Some(new_path) = &entry.new_path {
                        set.uploads.insert(new_path.clone());
                    }
                }
            }
        }
        set
    }

    /// Returns true if nothing needs to be sent.
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.deletes.is_empty()
    }

    /// Total number of remote calls (folder creation excluded).
    pub fn len(&self) -> usize {
        self.uploads.len() + self.deletes.len()
    }
}
