//! Remote history client: caching, id resolution and rate gating on top of
//! a [`RemoteTransport`].

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::rate_limit::RateGate;
use crate::transport::RemoteTransport;
use bytes::Bytes;
use leafsync_protocol::{
    empty_folders, normalize_path, parent_path, DiffOp, FiletreeDiffEntry, FolderNode, IdIndex,
    RemoteObjectId, Revision,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client for the remote's revision history and project tree.
///
/// Holds two session caches, the revision list and the id index. Each has
/// an explicit `invalidate_*` call; every structural mutation made through
/// this client invalidates the id index itself.
pub struct RemoteClient<T: RemoteTransport> {
    transport: T,
    revisions: Option<Vec<Revision>>,
    tree: Option<FolderNode>,
    index: Option<IdIndex>,
    snapshot_gate: RateGate,
    mutation_gate: RateGate,
    rate_limit_timeout: Duration,
    retry: RetryConfig,
}

impl<T: RemoteTransport> RemoteClient<T> {
    /// Creates a client using the rate windows from `config`.
    pub fn new(transport: T, config: &SyncConfig) -> Self {
        Self {
            transport,
            revisions: None,
            tree: None,
            index: None,
            snapshot_gate: RateGate::new("snapshot", config.snapshot_interval),
            mutation_gate: RateGate::new("mutation", config.mutation_interval),
            rate_limit_timeout: config.rate_limit_timeout,
            retry: config.retry.clone(),
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Lists all revisions, newest first, following pagination to the end.
    pub fn list_revisions(&mut self) -> SyncResult<Vec<Revision>> {
        if let Some(revisions) = &self.revisions {
            return Ok(revisions.clone());
        }

        let transport = &self.transport;
        let mut page = with_retry(&self.retry, "revisions", || transport.revisions_page(None))?;
        let mut revisions = std::mem::take(&mut page.updates);
        while let Some(cursor) = page.next_cursor() {
            debug!(before = cursor, "fetching older revisions");
            page = with_retry(&self.retry, "revisions", || {
                transport.revisions_page(Some(cursor))
            })?;
            revisions.append(&mut page.updates);
        }

        if revisions.is_empty() {
            return Err(SyncError::EmptyHistory);
        }
        debug!(count = revisions.len(), "fetched revision list");
        self.revisions = Some(revisions.clone());
        Ok(revisions)
    }

    /// Latest remote version (`to_v` of the newest revision).
    pub fn latest_version(&mut self) -> SyncResult<u64> {
        let revisions = self.list_revisions()?;
        Ok(revisions.first().map_or(0, |rev| rev.to_v))
    }

    /// Drops the cached revision list.
    pub fn invalidate_revisions(&mut self) {
        debug!("revision cache invalidated");
        self.revisions = None;
    }

    /// Changed paths between two versions; requires `from < to`.
    pub fn filetree_diff(&self, from: u64, to: u64) -> SyncResult<Vec<FiletreeDiffEntry>> {
        check_window(from, to)?;
        debug!(from, to, "fetching filetree diff");
        with_retry(&self.retry, "filetree diff", || {
            self.transport.filetree_diff(from, to)
        })
    }

    /// Fragment diff of one path between two versions; requires `from < to`.
    pub fn file_diff(&self, from: u64, to: u64, pathname: &str) -> SyncResult<Vec<DiffOp>> {
        check_window(from, to)?;
        debug!(from, to, pathname, "fetching file diff");
        with_retry(&self.retry, "file diff", || {
            self.transport.file_diff(from, to, pathname)
        })
    }

    /// Downloads the project archive at `version` (head if `None`).
    ///
    /// A gate slot further away than the rate limit timeout surfaces as
    /// `RateLimited` at once; only the remote's own refusals are retried.
    pub fn download_snapshot(&mut self, version: Option<u64>) -> SyncResult<Bytes> {
        self.snapshot_gate.acquire(self.rate_limit_timeout)?;
        info!(?version, "downloading project snapshot");
        with_retry(&self.retry, "snapshot", || {
            self.transport.download_archive(version)
        })
    }

    /// The folder tree, fetched on first use or after invalidation.
    pub fn folder_tree(&mut self) -> SyncResult<&FolderNode> {
        if self.tree.is_none() {
            debug!("fetching remote id tree");
            let transport = &self.transport;
            self.tree = Some(with_retry(&self.retry, "folder tree", || transport.folder_tree())?);
        }
        self.tree
            .as_ref()
            .ok_or_else(|| SyncError::InvariantViolation("folder tree missing after fetch".into()))
    }

    fn index(&mut self) -> SyncResult<&IdIndex> {
        if self.index.is_none() {
            let index = IdIndex::build(self.folder_tree()?);
            debug!(paths = index.len(), "rebuilt id index");
            self.index = Some(index);
        }
        self.index
            .as_ref()
            .ok_or_else(|| SyncError::InvariantViolation("id index missing after build".into()))
    }

    /// Drops the cached folder tree and id index.
    pub fn invalidate_index(&mut self) {
        debug!("id index invalidated");
        self.tree = None;
        self.index = None;
    }

    /// Resolves a project path to its remote id.
    pub fn resolve(&mut self, pathname: &str) -> SyncResult<RemoteObjectId> {
        let path = normalize_path(pathname);
        self.index()?
            .resolve(&path)
            .ok_or(SyncError::NotFound { path })
    }

    /// Remote folder paths (root excluded).
    pub fn folder_paths(&mut self) -> SyncResult<Vec<String>> {
        Ok(self.index()?.folder_paths().map(str::to_string).collect())
    }

    /// Outermost remote folders with no docs or files below them.
    pub fn empty_folders(&mut self) -> SyncResult<Vec<String>> {
        Ok(empty_folders(self.folder_tree()?))
    }

    /// Creates the folder at `pathname` and any missing ancestors, parent
    /// first. Returns the id of the folder; an existing folder is reused.
    pub fn create_folder(&mut self, pathname: &str) -> SyncResult<String> {
        let path = normalize_path(pathname);
        match self.resolve(&path) {
            Ok(object) if object.is_folder() => return Ok(object.id),
            Ok(object) => {
                return Err(SyncError::InvariantViolation(format!(
                    "cannot create folder `{}`: a {} exists at that path",
                    path, object.kind
                )))
            }
            Err(SyncError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let parent = parent_path(&path).to_string();
        let parent_id = self.create_folder(&parent)?;
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();

        info!(path = %path, "creating remote folder");
        let id = self.mutate("create folder", |transport| {
            transport.create_folder(&parent_id, &name)
        })?;
        self.invalidate_index();
        Ok(id)
    }

    /// Uploads `contents` to `pathname`, creating its folder chain first.
    pub fn upload(&mut self, pathname: &str, contents: Bytes) -> SyncResult<()> {
        let path = normalize_path(pathname);
        let folder_id = self.create_folder(parent_path(&path))?;
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();

        info!(path = %path, bytes = contents.len(), "uploading");
        self.mutate("upload", |transport| {
            transport.upload(&folder_id, &name, contents.clone())
        })?;
        self.invalidate_index();
        Ok(())
    }

    /// Deletes a remote object.
    pub fn delete(&mut self, object: &RemoteObjectId) -> SyncResult<()> {
        info!(id = %object.id, kind = %object.kind, "deleting remote object");
        self.mutate("delete", |transport| transport.delete(object))?;
        self.invalidate_index();
        Ok(())
    }

    /// Runs a structural mutation through the mutation gate.
    fn mutate<R>(&mut self, what: &str, op: impl Fn(&T) -> SyncResult<R>) -> SyncResult<R> {
        self.mutation_gate.acquire(self.rate_limit_timeout)?;
        with_retry(&self.retry, what, || op(&self.transport))
    }
}

/// Retries `op` while it reports `RateLimited`, sleeping for the larger of
/// the backoff delay and the remote's hint. Other errors surface at once.
fn with_retry<R>(
    retry: &RetryConfig,
    what: &str,
    mut op: impl FnMut() -> SyncResult<R>,
) -> SyncResult<R> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(SyncError::RateLimited { retry_after }) if attempt + 1 < retry.max_attempts => {
                attempt += 1;
                let delay = retry.delay_with_hint(attempt, retry_after);
                warn!(
                    call = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                std::thread::sleep(delay);
            }
            other => return other,
        }
    }
}

fn check_window(from: u64, to: u64) -> SyncResult<()> {
    if from >= to {
        return Err(SyncError::InvariantViolation(format!(
            "diff window {}->{} is not increasing",
            from, to
        )));
    }
    Ok(())
}
