//! Remote revisions and their authors.

use crate::error::ProtocolResult;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

/// Display name used when the remote does not report who made a change.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// A user of the remote service, as used for local commit authorship.
///
/// Two authors are the same person when their `id`s match.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Option<WireUser>")]
pub struct Author {
    /// Remote user id.
    pub id: String,
    /// Composed `"Last, First"` name.
    pub display_name: String,
    /// Email address.
    pub email: String,
}

impl Author {
    /// Creates an author from the remote's split name fields.
    pub fn new(
        id: impl Into<String>,
        first_name: &str,
        last_name: &str,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: format!("{}, {}", last_name, first_name),
            email: email.into(),
        }
    }

    /// The placeholder author for changes without user metadata.
    pub fn unknown() -> Self {
        Self {
            id: String::new(),
            display_name: UNKNOWN_AUTHOR.to_string(),
            email: String::new(),
        }
    }

    /// Returns true if this is the placeholder author.
    pub fn is_unknown(&self) -> bool {
        self.id.is_empty() && self.display_name == UNKNOWN_AUTHOR
    }
}

#[derive(Debug, Deserialize)]
struct WireUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    email: String,
}

impl From<Option<WireUser>> for Author {
    fn from(user: Option<WireUser>) -> Self {
        match user {
            Some(user) => Author::new(user.id, &user.first_name, &user.last_name, user.email),
            None => Author::unknown(),
        }
    }
}

/// Metadata attached to revisions and to changed diff fragments.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireMeta {
    #[serde(default)]
    pub(crate) users: Vec<Author>,
    #[serde(default)]
    pub(crate) end_ts: Option<i64>,
}

/// One atomic step of the remote's version counter, spanning `from_v -> to_v`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "WireRevision")]
pub struct Revision {
    /// Version the step starts from.
    pub from_v: u64,
    /// Version the step ends at.
    pub to_v: u64,
    /// Time of the last change in the step, in milliseconds since the epoch.
    pub timestamp_ms: i64,
    /// Users who contributed, in the order reported by the remote.
    pub users: Vec<Author>,
}

impl Revision {
    /// Creates a new revision.
    pub fn new(from_v: u64, to_v: u64, timestamp_ms: i64, users: Vec<Author>) -> Self {
        Self {
            from_v,
            to_v,
            timestamp_ms,
            users,
        }
    }

    /// Returns the commit timestamp in UTC.
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Returns true if more than one user contributed to this revision.
    pub fn is_multi_author(&self) -> bool {
        self.users.len() > 1
    }

    /// Returns true if the window spans no versions.
    pub fn is_empty(&self) -> bool {
        self.from_v >= self.to_v
    }

    /// Human-readable `from->to` label, also used as the mirror commit message.
    pub fn label(&self) -> String {
        format!("{}->{}", self.from_v, self.to_v)
    }
}

#[derive(Debug, Deserialize)]
struct WireRevision {
    #[serde(rename = "fromV")]
    from_v: u64,
    #[serde(rename = "toV")]
    to_v: u64,
    #[serde(default)]
    meta: WireMeta,
}

impl From<WireRevision> for Revision {
    fn from(wire: WireRevision) -> Self {
        Revision {
            from_v: wire.from_v,
            to_v: wire.to_v,
            timestamp_ms: wire.meta.end_ts.unwrap_or(0),
            users: wire.meta.users,
        }
    }
}

/// One page of the revision list, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevisionPage {
    /// Revisions on this page.
    pub updates: Vec<Revision>,
    /// Cursor for the next (older) page.
    #[serde(rename = "nextBeforeTimestamp", default)]
    pub next_before_timestamp: Option<i64>,
}

impl RevisionPage {
    /// Decodes a page from the remote's JSON body.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Returns the cursor for the next page, if there is one.
    pub fn next_cursor(&self) -> Option<i64> {
        self.next_before_timestamp.filter(|ts| *ts > 0)
    }
}

/// Versions missing between two consecutive revision windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGap {
    /// Last version covered before the gap.
    pub after: u64,
    /// First window start past the gap.
    pub resumes_at: u64,
}

impl fmt::Display for VersionGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "versions {}..{} missing", self.after, self.resumes_at)
    }
}

/// Finds the gaps in the remote list past `recorded`, oldest first.
///
/// A gap is a window starting later than the previous one ended (or later
/// than `recorded` for the oldest). [`revisions_after`] bridges gaps by
/// widening the later window, so the versions inside one are attributed to
/// that window's authors.
pub fn version_gaps(revisions: &[Revision], recorded: u64) -> Vec<VersionGap> {
    let mut gaps = Vec::new();
    let unseen: Vec<&Revision> = revisions
        .iter()
        .take_while(|rev| rev.to_v > recorded)
        .collect();
    let mut previous_to = recorded;
    for rev in unseen.into_iter().rev() {
        if rev.from_v > previous_to {
            gaps.push(VersionGap {
                after: previous_to,
                resumes_at: rev.from_v,
            });
        }
        previous_to = rev.to_v;
    }
    gaps
}

/// Selects the revisions not yet replayed locally, oldest first.
///
/// `revisions` is the remote list, newest first. The result is the prefix
/// whose `to_v` exceeds `recorded`, reversed, with windows made contiguous:
/// the oldest window starts at `recorded` (a boundary that shifted since the
/// last fetch is clamped instead of replayed twice) and every later window
/// starts where the previous one ended.
pub fn revisions_after(revisions: &[Revision], recorded: u64) -> Vec<Revision> {
    let mut upcoming: Vec<Revision> = revisions
        .iter()
        .take_while(|rev| rev.to_v > recorded)
        .cloned()
        .collect();
    upcoming.reverse();

    let mut previous_to = recorded;
    for rev in &mut upcoming {
        rev.from_v = previous_to;
        previous_to = rev.to_v;
    }
    upcoming
}
