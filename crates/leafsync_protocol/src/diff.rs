//! Filetree and per-file diffs between two remote versions.

use crate::error::{ProtocolError, ProtocolResult};
use crate::revision::{Author, WireMeta};
use serde::Deserialize;

/// Kind of structural change to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiletreeOperation {
    /// Path was created.
    Added,
    /// Path content changed.
    Edited,
    /// Path was deleted.
    Removed,
    /// Path was moved to `new_pathname`.
    Renamed,
}

impl FiletreeOperation {
    /// Returns true for operations that take a path away.
    pub fn is_removal(&self) -> bool {
        matches!(self, FiletreeOperation::Removed | FiletreeOperation::Renamed)
    }
}

/// A changed path in the remote file tree between two versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiletreeDiffEntry {
    /// Path relative to the project root.
    pub pathname: String,
    /// What happened to the path.
    pub operation: FiletreeOperation,
    /// Target path for renames.
    pub new_pathname: Option<String>,
    /// Whether the remote can serve a textual diff for the path.
    pub editable: bool,
}

impl FiletreeDiffEntry {
    /// Creates an entry for a path change.
    pub fn new(pathname: impl Into<String>, operation: FiletreeOperation) -> Self {
        Self {
            pathname: pathname.into(),
            operation,
            new_pathname: None,
            editable: true,
        }
    }

    /// Creates a rename entry.
    pub fn renamed(pathname: impl Into<String>, new_pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            operation: FiletreeOperation::Renamed,
            new_pathname: Some(new_pathname.into()),
            editable: true,
        }
    }

    /// Marks the entry as binary (no textual diff available).
    pub fn binary(self) -> Self {
        self.with_editable(false)
    }

    /// Sets whether a textual diff is available.
    pub fn with_editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    /// Returns true if the change can be replayed from textual diffs.
    ///
    /// Removals and renames never need content, so they qualify even
    /// for binary paths.
    pub fn replayable_as_text(&self) -> bool {
        self.editable || self.operation.is_removal()
    }
}

#[derive(Debug, Deserialize)]
struct WireFiletreeEntry {
    pathname: String,
    #[serde(default)]
    operation: Option<FiletreeOperation>,
    #[serde(rename = "newPathname", default)]
    new_pathname: Option<String>,
    #[serde(default)]
    editable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WireDiff<T> {
    diff: Vec<T>,
}

/// Decodes a filetree diff body, keeping only changed entries.
pub fn decode_filetree_diff(bytes: &[u8]) -> ProtocolResult<Vec<FiletreeDiffEntry>> {
    let wire: WireDiff<WireFiletreeEntry> = serde_json::from_slice(bytes)?;
    let mut entries = Vec::new();
    for raw in wire.diff {
        let Some(operation) = raw.operation else {
            continue;
        };
        if operation == FiletreeOperation::Renamed && raw.new_pathname.is_none() {
            return Err(ProtocolError::MissingField {
                field: "newPathname",
                context: format!("renamed entry `{}`", raw.pathname),
            });
        }
        entries.push(FiletreeDiffEntry {
            pathname: raw.pathname,
            operation,
            new_pathname: raw.new_pathname,
            editable: raw.editable.unwrap_or(true),
        });
    }
    Ok(entries)
}

/// Kind tag of a diff fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Text present in both versions.
    Unchanged,
    /// Text added in the target version.
    Inserted,
    /// Text removed in the target version.
    Deleted,
}

/// One fragment of a per-file textual diff.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "WireDiffOp")]
pub struct DiffOp {
    /// Fragment kind.
    pub kind: DiffKind,
    /// Fragment text.
    pub text: String,
    /// Users responsible for an inserted or deleted fragment.
    pub users: Vec<Author>,
    /// Time of the change in milliseconds since the epoch.
    pub end_ts: Option<i64>,
}

impl DiffOp {
    /// Creates an unchanged fragment.
    pub fn unchanged(text: impl Into<String>) -> Self {
        Self {
            kind: DiffKind::Unchanged,
            text: text.into(),
            users: Vec::new(),
            end_ts: None,
        }
    }

    /// Creates an inserted fragment.
    pub fn inserted(text: impl Into<String>, users: Vec<Author>, end_ts: i64) -> Self {
        Self {
            kind: DiffKind::Inserted,
            text: text.into(),
            users,
            end_ts: Some(end_ts),
        }
    }

    /// Creates a deleted fragment.
    pub fn deleted(text: impl Into<String>, users: Vec<Author>, end_ts: i64) -> Self {
        Self {
            kind: DiffKind::Deleted,
            text: text.into(),
            users,
            end_ts: Some(end_ts),
        }
    }

    /// Returns true if the fragment is a change (inserted or deleted).
    pub fn is_change(&self) -> bool {
        self.kind != DiffKind::Unchanged
    }
}

#[derive(Debug, Deserialize)]
struct WireDiffOp {
    #[serde(default)]
    u: Option<String>,
    #[serde(default)]
    i: Option<String>,
    #[serde(default)]
    d: Option<String>,
    #[serde(default)]
    meta: Option<WireMeta>,
}

impl TryFrom<WireDiffOp> for DiffOp {
    type Error = ProtocolError;

    fn try_from(wire: WireDiffOp) -> Result<Self, Self::Error> {
        let tags = [wire.u.is_some(), wire.i.is_some(), wire.d.is_some()]
            .iter()
            .filter(|present| **present)
            .count();
        let (kind, text) = match (wire.u, wire.i, wire.d) {
            (Some(text), None, None) => (DiffKind::Unchanged, text),
            (None, Some(text), None) => (DiffKind::Inserted, text),
            (None, None, Some(text)) => (DiffKind::Deleted, text),
            _ => return Err(ProtocolError::AmbiguousFragment { tags }),
        };
        let meta = wire.meta.unwrap_or_default();
        Ok(DiffOp {
            kind,
            text,
            users: meta.users,
            end_ts: meta.end_ts,
        })
    }
}

/// Decodes a per-file diff body.
pub fn decode_file_diff(bytes: &[u8]) -> ProtocolResult<Vec<DiffOp>> {
    let wire: WireDiff<DiffOp> = serde_json::from_slice(bytes)?;
    Ok(wire.diff)
}

/// Rebuilds the target-version content from a fragment sequence.
pub fn reconstruct(ops: &[DiffOp]) -> String {
    ops.iter()
        .filter(|op| op.kind != DiffKind::Deleted)
        .map(|op| op.text.as_str())
        .collect()
}

/// Collects the distinct users behind changed fragments, in first-seen
/// order, together with the latest change timestamp.
pub fn contributors<'a>(ops: impl IntoIterator<Item = &'a DiffOp>) -> (Vec<Author>, Option<i64>) {
    let mut users: Vec<Author> = Vec::new();
    let mut latest: Option<i64> = None;
    for op in ops.into_iter().filter(|op| op.is_change()) {
        for user in &op.users {
            if !users.iter().any(|seen| seen.id == user.id) {
                users.push(user.clone());
            }
        }
        if let Some(ts) = op.end_ts {
            latest = Some(latest.map_or(ts, |current| current.max(ts)));
        }
    }
    (users, latest)
}
