//! Replaying remote revisions as mirror-branch commits.

use crate::client::RemoteClient;
use crate::error::{SyncError, SyncResult};
use crate::repo::GitRepository;
use crate::transport::RemoteTransport;
use chrono::{DateTime, Utc};
use leafsync_protocol::{
    contributors, normalize_path, reconstruct, Author, DiffOp, FiletreeDiffEntry,
    FiletreeOperation, Revision,
};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// A mirror commit created by replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedCommit {
    /// Window start.
    pub from_v: u64,
    /// Window end, the version recorded by the commit.
    pub to_v: u64,
    /// Commit author.
    pub author: Author,
}

/// How a window's file changes were materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPath {
    /// Reconstructed from per-file fragment diffs.
    Diff,
    /// Extracted from a full project archive.
    Snapshot,
}

/// Picks the replay path for a window: fragment diffs work only when no
/// entry needs binary content.
pub fn choose_path(entries: &[FiletreeDiffEntry]) -> ReplayPath {
    if entries.iter().all(FiletreeDiffEntry::replayable_as_text) {
        ReplayPath::Diff
    } else {
        ReplayPath::Snapshot
    }
}

/// Replays remote revisions onto the checked-out mirror branch.
pub struct Replayer<'a, T: RemoteTransport> {
    client: &'a mut RemoteClient<T>,
    repo: &'a GitRepository,
}

impl<'a, T: RemoteTransport> Replayer<'a, T> {
    /// Creates a replayer writing into `repo`'s working tree.
    pub fn new(client: &'a mut RemoteClient<T>, repo: &'a GitRepository) -> Self {
        Self { client, repo }
    }

    /// Replays one revision, splitting it per author when several users
    /// contributed. Returns the commits created, oldest first.
    pub fn replay_revision(&mut self, revision: &Revision) -> SyncResult<Vec<ReplayedCommit>> {
        if revision.is_empty() {
            warn!(window = %revision.label(), "skipping zero-width revision window");
            return Ok(Vec::new());
        }

        if revision.is_multi_author() {
            return self.replay_split(revision);
        }

        let author = revision.users.first().cloned().unwrap_or_else(Author::unknown);
        let commit = self.migrate(revision.from_v, revision.to_v, &author, revision.timestamp_ms)?;
        Ok(vec![commit])
    }

    /// Splits a multi-author revision into contiguous single-author runs,
    /// probing each 1-step window for its contributor.
    fn replay_split(&mut self, revision: &Revision) -> SyncResult<Vec<ReplayedCommit>> {
        debug!(
            window = %revision.label(),
            users = ?revision.users.iter().map(|u| u.display_name.as_str()).collect::<Vec<_>>(),
            "splitting multi-author revision"
        );

        let mut commits = Vec::new();
        let mut run_start = revision.from_v;
        let mut current: Option<(Author, i64)> = None;

        for v in revision.from_v + 1..=revision.to_v {
            let (users, ts) = self.step_contributors(v - 1, v)?;
            let Some(user) = users.first() else {
                debug!(step = v, "no activity in step");
                continue;
            };
            if users.len() > 1 {
                warn!(
                    step = v,
                    count = users.len(),
                    "several users in one step, attributing to the first"
                );
            }
            let ts = ts.unwrap_or(revision.timestamp_ms);

            match current.as_ref().map(|(author, _)| author.id == user.id) {
                None => current = Some((user.clone(), ts)),
                Some(true) => {
                    if let Some((_, last_ts)) = current.as_mut() {
                        *last_ts = ts;
                    }
                }
                Some(false) => {
                    if let Some((author, last_ts)) = current.take() {
                        commits.push(self.migrate(run_start, v - 1, &author, last_ts)?);
                        run_start = v - 1;
                    }
                    current = Some((user.clone(), ts));
                }
            }
        }

        let (author, ts) = current.unwrap_or_else(|| {
            (
                revision.users.first().cloned().unwrap_or_else(Author::unknown),
                revision.timestamp_ms,
            )
        });
        commits.push(self.migrate(run_start, revision.to_v, &author, ts)?);
        Ok(commits)
    }

    /// Users behind the changes of one window, with the latest change time.
    fn step_contributors(&mut self, from: u64, to: u64) -> SyncResult<(Vec<Author>, Option<i64>)> {
        let entries = self.client.filetree_diff(from, to)?;
        let mut ops: Vec<DiffOp> = Vec::new();
        for entry in entries.iter().filter(|e| e.editable) {
            ops.extend(self.client.file_diff(from, to, &entry.pathname)?);
        }
        Ok(contributors(ops.iter()))
    }

    /// Materializes window `from -> to` and commits it as `"{from}->{to}"`.
    pub fn migrate(
        &mut self,
        from: u64,
        to: u64,
        author: &Author,
        timestamp_ms: i64,
    ) -> SyncResult<ReplayedCommit> {
        let entries = self.client.filetree_diff(from, to)?;
        let path = choose_path(&entries);
        debug!(from, to, changes = entries.len(), ?path, "migrating window");

        match path {
            ReplayPath::Diff => self.apply_diff(from, to, &entries)?,
            ReplayPath::Snapshot => {
                info!(from, to, "binary change, replaying from snapshot");
                self.apply_snapshot(to)?;
            }
        }

        let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
            SyncError::InvariantViolation(format!("timestamp {} out of range", timestamp_ms))
        })?;
        let message = format!("{}->{}", from, to);
        self.repo.stage_all()?;
        self.repo.commit(&message, author, timestamp, true)?;
        info!(window = %message, author = %author.display_name, "committed");

        Ok(ReplayedCommit {
            from_v: from,
            to_v: to,
            author: author.clone(),
        })
    }

    fn apply_diff(&mut self, from: u64, to: u64, entries: &[FiletreeDiffEntry]) -> SyncResult<()> {
        // Removals first so a path freed by a rename can be reused.
        for entry in entries.iter().filter(|e| e.operation.is_removal()) {
            let path = local_path(self.repo.root(), &entry.pathname)?;
            match entry.operation {
                FiletreeOperation::Removed => {
                    debug!(path = %entry.pathname, "remove");
                    remove_file(self.repo.root(), &path)?;
                }
                FiletreeOperation::Renamed => {
                    let new_pathname = entry.new_pathname.as_deref().ok_or_else(|| {
                        SyncError::InvariantViolation(format!(
                            "rename of `{}` without a target",
                            entry.pathname
                        ))
                    })?;
                    let target = local_path(self.repo.root(), new_pathname)?;
                    debug!(from = %entry.pathname, to = new_pathname, "rename");
                    if !path.exists() {
                        warn!(path = %entry.pathname, "rename source missing locally");
                        continue;
                    }
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::rename(&path, &target)?;
                    prune_empty_parents(self.repo.root(), &path);
                }
                _ => {}
            }
        }

        for entry in entries.iter().filter(|e| !e.operation.is_removal()) {
            let path = local_path(self.repo.root(), &entry.pathname)?;
            let ops = self.client.file_diff(from, to, &entry.pathname)?;
            debug!(path = %entry.pathname, op = ?entry.operation, "write");
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, reconstruct(&ops))?;
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, version: u64) -> SyncResult<()> {
        let bytes = self.client.download_snapshot(Some(version))?;
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let root = self.repo.root().to_path_buf();

        let mut present = HashSet::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let Some(relative) = file.enclosed_name() else {
                warn!(name = file.name(), "skipping archive entry outside the project");
                continue;
            };
            let target = root.join(&relative);
            if file.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target)?;
            io::copy(&mut file, &mut out)?;
            present.insert(normalize_path(&relative.to_string_lossy()));
        }

        for tracked in self.repo.list_tracked_paths()? {
            if !present.contains(&tracked) {
                debug!(path = %tracked, "not in snapshot, removing");
                remove_file(&root, &root.join(&tracked))?;
            }
        }
        Ok(())
    }
}

/// Maps a project path into the working tree, refusing paths that escape it.
pub fn local_path(root: &Path, pathname: &str) -> SyncResult<PathBuf> {
    let normalized = normalize_path(pathname);
    let escapes = Path::new(&normalized)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if normalized.is_empty() || escapes {
        return Err(SyncError::InvariantViolation(format!(
            "remote path `{}` is not inside the project",
            pathname
        )));
    }
    Ok(root.join(normalized))
}

fn remove_file(root: &Path, path: &Path) -> SyncResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            prune_empty_parents(root, path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "already absent");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Removes now-empty directories between `path` and `root`.
fn prune_empty_parents(root: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        if fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}
