//! Synchronization coordinator.
//!
//! `SyncEngine` owns the remote client and the local repository and drives
//! a session through `Idle → Pulling → Rebasing → Pushing → Idle`. Any
//! error moves the engine to `Failed`, which refuses further runs until
//! [`SyncEngine::reset`] is called after manual intervention.

use crate::changeset::PendingChangeSet;
use crate::client::RemoteClient;
use crate::config::{SyncConfig, SESSION_DIR_NAME};
use crate::confirm::{AlwaysDeny, ConfirmDelete};
use crate::error::{SyncError, SyncResult};
use crate::replay::{ReplayedCommit, Replayer};
use crate::repo::{GitRepository, RebaseOutcome};
use crate::transport::RemoteTransport;
use bytes::Bytes;
use leafsync_protocol::{revisions_after, version_gaps};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No run in progress.
    Idle,
    /// Replaying remote revisions onto the mirror branch.
    Pulling,
    /// Rebasing the work branch onto the mirror branch.
    Rebasing,
    /// Sending local changes to the remote.
    Pushing,
    /// A run stopped on an error and needs manual intervention.
    Failed,
}

impl SyncState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Pulling | SyncState::Rebasing | SyncState::Pushing
        )
    }

    /// Returns true if a new run may start.
    pub fn can_start(&self) -> bool {
        matches!(self, SyncState::Idle)
    }
}

/// Summary of a pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    /// Recorded remote version before the pull.
    pub from_version: u64,
    /// Recorded remote version after the pull.
    pub to_version: u64,
    /// Mirror commits created, oldest first.
    pub commits: Vec<ReplayedCommit>,
    /// Local directories removed by pruning.
    pub pruned_dirs: Vec<String>,
    /// Nothing was written.
    pub dry_run: bool,
}

impl PullReport {
    fn new(version: u64, dry_run: bool) -> Self {
        Self {
            from_version: version,
            to_version: version,
            dry_run,
            ..Self::default()
        }
    }

    /// Returns true if the pull found nothing to do.
    pub fn is_up_to_date(&self) -> bool {
        self.commits.is_empty() && self.pruned_dirs.is_empty() && self.from_version == self.to_version
    }
}

impl fmt::Display for PullReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.dry_run { "[dry run] " } else { "" };
        if self.is_up_to_date() {
            return write!(f, "{}already up to date at version {}", prefix, self.to_version);
        }
        write!(
            f,
            "{}pulled version {} -> {} ({} commit(s))",
            prefix,
            self.from_version,
            self.to_version,
            self.commits.len()
        )?;
        for commit in &self.commits {
            write!(
                f,
                "\n  {}->{} {}",
                commit.from_v, commit.to_v, commit.author.display_name
            )?;
        }
        for dir in &self.pruned_dirs {
            write!(f, "\n  pruned {}/", dir)?;
        }
        Ok(())
    }
}

/// Summary of a push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    /// Remote version before the push.
    pub from_version: u64,
    /// Recorded remote version after the confirming pull.
    pub to_version: u64,
    /// Paths uploaded.
    pub uploaded: Vec<String>,
    /// Paths deleted, folders included.
    pub deleted: Vec<String>,
    /// Folder deletes refused by the confirmation policy.
    pub skipped_folder_deletes: Vec<String>,
    /// Deletes whose path no longer exists remotely.
    pub missing_deletes: Vec<String>,
    /// The confirming pull.
    pub pull: Option<PullReport>,
    /// Audit tag created on the work branch.
    pub tag: Option<String>,
    /// Work and mirror trees matched after the confirming pull.
    pub converged: bool,
    /// The work branch had nothing past the fork point.
    pub nothing_to_push: bool,
    /// Nothing was written.
    pub dry_run: bool,
}

impl PushReport {
    fn new(version: u64, dry_run: bool) -> Self {
        Self {
            from_version: version,
            to_version: version,
            dry_run,
            ..Self::default()
        }
    }
}

impl fmt::Display for PushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.dry_run { "[dry run] " } else { "" };
        if self.nothing_to_push {
            return write!(f, "{}nothing to push", prefix);
        }
        write!(
            f,
            "{}pushed {} upload(s), {} delete(s); version {} -> {}",
            prefix,
            self.uploaded.len(),
            self.deleted.len(),
            self.from_version,
            self.to_version
        )?;
        for path in &self.deleted {
            write!(f, "\n  deleted  {}", path)?;
        }
        for path in &self.uploaded {
            write!(f, "\n  uploaded {}", path)?;
        }
        for path in &self.skipped_folder_deletes {
            write!(f, "\n  skipped  {}/ (not confirmed)", path)?;
        }
        if let Some(tag) = &self.tag {
            write!(f, "\n  tagged {}", tag)?;
        }
        if !self.dry_run && !self.converged {
            write!(f, "\n  warning: work and mirror branches differ after push")?;
        }
        Ok(())
    }
}

/// Summary of a sync (pull then push).
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// The pull.
    pub pull: PullReport,
    /// The push.
    pub push: PushReport,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.pull, self.push)
    }
}

/// Tag name recording the remote version a push produced.
pub fn version_tag(version: u64) -> String {
    format!("v{}", version)
}

/// Coordinates pulls and pushes between a remote project and a local
/// checkout.
pub struct SyncEngine<T: RemoteTransport> {
    config: SyncConfig,
    client: RemoteClient<T>,
    repo: GitRepository,
    confirm: Box<dyn ConfirmDelete>,
    state: SyncState,
    stashed: bool,
}

impl<T: RemoteTransport> SyncEngine<T> {
    /// Creates an engine. Folder deletes are refused until a confirmation
    /// policy is set with [`SyncEngine::with_confirm`].
    pub fn new(config: SyncConfig, transport: T, repo: GitRepository) -> Self {
        let client = RemoteClient::new(transport, &config);
        Self {
            config,
            client,
            repo,
            confirm: Box::new(AlwaysDeny),
            state: SyncState::Idle,
            stashed: false,
        }
    }

    /// Sets the folder-delete confirmation policy.
    pub fn with_confirm(mut self, confirm: impl ConfirmDelete + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Clears a `Failed` state once the repository has been repaired.
    pub fn reset(&mut self) {
        if self.state == SyncState::Failed {
            info!("resetting failed engine");
        }
        self.state = SyncState::Idle;
        self.stashed = false;
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the local repository.
    pub fn repo(&self) -> &GitRepository {
        &self.repo
    }

    /// Gets the remote client.
    pub fn client(&self) -> &RemoteClient<T> {
        &self.client
    }

    /// Creates the local repository from the full remote history.
    ///
    /// The directory must be empty apart from the session directory. With
    /// `force`, an existing `.git` is removed first.
    pub fn init(&mut self, force: bool) -> SyncResult<PullReport> {
        self.start()?;
        let result = self.init_inner(force);
        self.finish(result)
    }

    /// Replays unseen remote revisions onto the mirror branch and rebases
    /// the work branch onto it.
    pub fn pull(&mut self) -> SyncResult<PullReport> {
        self.start()?;
        let result = self.check_layout().and_then(|()| self.pull_inner());
        self.finish(result)
    }

    /// Sends work-branch changes since the fork point to the remote and
    /// absorbs the result with a confirming pull.
    pub fn push(&mut self) -> SyncResult<PushReport> {
        self.start()?;
        let result = self.check_layout().and_then(|()| self.push_inner());
        self.finish(result)
    }

    /// Pull followed by push.
    pub fn sync(&mut self) -> SyncResult<SyncReport> {
        let pull = self.pull()?;
        let push = self.push()?;
        Ok(SyncReport { pull, push })
    }

    /// Verifies the repository has both branches and the fork point.
    pub fn check_layout(&self) -> SyncResult<()> {
        if !self.repo.is_repository() {
            return Err(SyncError::NotInitialized(format!(
                "no repository at {}",
                self.repo.root().display()
            )));
        }
        for branch in [&self.config.mirror_branch, &self.config.work_branch] {
            if !self.repo.branch_exists(branch)? {
                return Err(SyncError::RepositoryCorrupted(format!(
                    "branch `{}` is missing",
                    branch
                )));
            }
        }
        if !self.repo.tag_exists(&self.config.fork_point_tag)? {
            return Err(SyncError::RepositoryCorrupted(format!(
                "tag `{}` is missing",
                self.config.fork_point_tag
            )));
        }
        Ok(())
    }

    fn start(&mut self) -> SyncResult<()> {
        if !self.state.can_start() {
            return Err(SyncError::InvariantViolation(format!(
                "cannot start a run in state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn finish<R>(&mut self, result: SyncResult<R>) -> SyncResult<R> {
        match &result {
            Ok(_) => self.state = SyncState::Idle,
            Err(e) => {
                error!(state = ?self.state, error = %e, "run failed");
                if self.stashed {
                    warn!("local changes are still stashed; run `git stash pop` once the repository is repaired");
                }
                self.state = SyncState::Failed;
            }
        }
        result
    }

    fn init_inner(&mut self, force: bool) -> SyncResult<PullReport> {
        let root = self.repo.root().to_path_buf();
        if self.repo.is_repository() {
            if !force {
                return Err(SyncError::AlreadyInitialized(root.display().to_string()));
            }
            warn!(path = %root.display(), "removing existing repository");
            fs::remove_dir_all(root.join(".git"))?;
        }
        if root.exists() {
            let mut foreign = Vec::new();
            for entry in fs::read_dir(&root)? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if name != SESSION_DIR_NAME {
                    foreign.push(name);
                }
            }
            if !foreign.is_empty() {
                foreign.sort();
                return Err(SyncError::DirtyWorkingTree(format!(
                    "{} is not empty ({})",
                    root.display(),
                    foreign.join(", ")
                )));
            }
        }

        let remote = self.client.latest_version()?;
        info!(path = %root.display(), remote, "initializing repository");
        self.repo.init(&self.config.mirror_branch)?;

        self.state = SyncState::Pulling;
        let mut report = PullReport::new(0, false);
        report.commits = self.replay_from(0, false)?;
        report.to_version = self.repo.recorded_version(&self.config.mirror_branch)?;

        self.repo
            .force_branch(&self.config.work_branch, &self.config.mirror_branch)?;
        self.repo
            .tag(&self.config.fork_point_tag, &self.config.mirror_branch, true)?;
        self.repo.switch(&self.config.work_branch)?;
        info!(version = report.to_version, commits = report.commits.len(), "initialized");
        Ok(report)
    }

    fn pull_inner(&mut self) -> SyncResult<PullReport> {
        let dry_run = self.config.dry_run;
        self.client.invalidate_revisions();
        let recorded = self.repo.recorded_version(&self.config.mirror_branch)?;
        let remote = self.client.latest_version()?;
        check_versions(recorded, remote)?;
        info!(local = recorded, remote, "comparing versions");

        let absorbed = self.work_contains_mirror()?;
        if absorbed && !dry_run {
            self.settle_fork_point()?;
        }

        let mut report = PullReport::new(recorded, dry_run);
        if recorded == remote && absorbed && !self.config.prune {
            info!(version = recorded, "already up to date");
            return Ok(report);
        }

        if dry_run {
            report.commits = self.replay_from(recorded, true)?;
            if self.config.prune {
                report.pruned_dirs = self.prune_local(true)?;
            }
            report.to_version = remote;
            return Ok(report);
        }

        self.begin_run()?;
        self.state = SyncState::Pulling;
        report.commits = self.replay_from(recorded, false)?;
        if self.config.prune {
            report.pruned_dirs = self.prune_local(false)?;
        }
        report.to_version = self.repo.recorded_version(&self.config.mirror_branch)?;
        self.rebase_work()?;
        self.end_run()?;
        Ok(report)
    }

    fn push_inner(&mut self) -> SyncResult<PushReport> {
        let dry_run = self.config.dry_run;
        let fork = self.config.fork_point_tag.clone();
        let work = self.config.work_branch.clone();

        self.client.invalidate_revisions();
        let recorded = self.repo.recorded_version(&self.config.mirror_branch)?;
        let remote = self.client.latest_version()?;
        check_versions(recorded, remote)?;
        if remote > recorded {
            return Err(SyncError::RemoteAheadOfLocal {
                local: recorded,
                remote,
            });
        }
        if !self.work_contains_mirror()? {
            return Err(SyncError::InvariantViolation(format!(
                "branch `{}` does not contain `{}`; finish the rebase and pull before pushing",
                work, self.config.mirror_branch
            )));
        }
        // A dry run leaves the tag alone and diffs from where it would move.
        let base = if dry_run {
            self.config.mirror_branch.clone()
        } else {
            self.settle_fork_point()?;
            fork
        };

        let mut report = PushReport::new(recorded, dry_run);
        let ahead = self.repo.commits_between(&base, &work)?;
        let statuses = self.repo.path_status_since(&base, &work)?;
        let changes = PendingChangeSet::from_statuses(&statuses);
        if (ahead == 0 || changes.is_empty()) && !self.config.prune {
            info!(branch = %work, "nothing to push");
            report.nothing_to_push = true;
            report.converged = true;
            return Ok(report);
        }
        info!(
            commits = ahead,
            uploads = changes.uploads.len(),
            deletes = changes.deletes.len(),
            "pushing"
        );

        self.begin_run()?;
        self.state = SyncState::Pushing;
        for path in &changes.deletes {
            self.delete_remote(path, false, &mut report)?;
        }
        for path in &changes.uploads {
            let contents = self.repo.read_blob(&work, path)?;
            if dry_run {
                info!(path = %path, bytes = contents.len(), "would upload");
            } else {
                self.client.upload(path, Bytes::from(contents))?;
            }
            report.uploaded.push(path.clone());
        }
        if self.config.prune {
            for folder in self.client.empty_folders()? {
                self.delete_remote(&folder, true, &mut report)?;
            }
        }

        if dry_run {
            self.end_run()?;
            return Ok(report);
        }

        self.client.invalidate_index();
        self.client.invalidate_revisions();

        self.state = SyncState::Pulling;
        let mut pull = PullReport::new(recorded, false);
        pull.commits = self.replay_from(recorded, false)?;
        if self.config.prune {
            pull.pruned_dirs = self.prune_local(false)?;
        }
        pull.to_version = self.repo.recorded_version(&self.config.mirror_branch)?;
        report.to_version = pull.to_version;
        report.pull = Some(pull);

        report.converged = self
            .repo
            .trees_identical(&work, &self.config.mirror_branch)?;
        if report.converged {
            self.fast_forward_work()?;
        } else {
            warn!(
                work = %work,
                mirror = %self.config.mirror_branch,
                "work and mirror trees differ after push; another user may have edited concurrently"
            );
            self.rebase_work()?;
        }

        let tag = version_tag(report.to_version);
        if self.repo.tag_exists(&tag)? {
            info!(tag = %tag, "version tag already exists, not re-tagging");
        } else {
            self.repo.tag(&tag, &work, false)?;
            report.tag = Some(tag);
        }
        self.end_run()?;
        Ok(report)
    }

    /// Stashes local changes or refuses a dirty tree, then checks out the
    /// work branch.
    fn begin_run(&mut self) -> SyncResult<()> {
        let work = &self.config.work_branch;
        if self.config.stash {
            self.stashed = self.repo.stash()?;
            if self.stashed {
                debug!("stashed local changes");
            }
        } else if !self.repo.is_working_tree_clean()? {
            return Err(SyncError::DirtyWorkingTree(work.clone()));
        }
        self.repo.switch(work)
    }

    fn end_run(&mut self) -> SyncResult<()> {
        if !self.stashed {
            return Ok(());
        }
        let current = self.repo.current_branch()?;
        if current == self.config.work_branch {
            self.repo.stash_pop()?;
            debug!("restored stashed changes");
        } else {
            warn!(branch = %current, "not on the work branch; stashed changes left in place");
        }
        self.stashed = false;
        Ok(())
    }

    /// Replays every revision past `recorded` onto the mirror branch.
    fn replay_from(&mut self, recorded: u64, dry_run: bool) -> SyncResult<Vec<ReplayedCommit>> {
        let revisions = self.client.list_revisions()?;
        for gap in version_gaps(&revisions, recorded) {
            warn!(
                after = gap.after,
                resumes_at = gap.resumes_at,
                "remote history has a gap; the missing versions are folded into the next window"
            );
        }
        let upcoming = revisions_after(&revisions, recorded);
        debug!(
            count = upcoming.len(),
            windows = ?upcoming.iter().map(|r| r.label()).collect::<Vec<_>>(),
            "upcoming revisions"
        );
        if dry_run {
            for rev in &upcoming {
                info!(window = %rev.label(), users = rev.users.len(), "would replay");
            }
            return Ok(Vec::new());
        }
        if upcoming.is_empty() {
            return Ok(Vec::new());
        }

        // A fresh repository sits on the unborn mirror branch, which
        // cannot be switched to.
        if self.repo.current_branch()? != self.config.mirror_branch {
            self.repo.switch(&self.config.mirror_branch)?;
        }
        let total = upcoming.len();
        let mut replayer = Replayer::new(&mut self.client, &self.repo);
        let mut commits = Vec::new();
        for (i, rev) in upcoming.iter().enumerate() {
            info!(n = i + 1, total, window = %rev.label(), "replaying revision");
            commits.extend(replayer.replay_revision(rev)?);
        }
        Ok(commits)
    }

    /// Rebases the work branch onto the mirror and advances the fork point.
    fn rebase_work(&mut self) -> SyncResult<()> {
        self.state = SyncState::Rebasing;
        let mirror = &self.config.mirror_branch;
        let work = &self.config.work_branch;
        match self.repo.rebase(mirror, work)? {
            RebaseOutcome::Success => {
                self.repo.tag(&self.config.fork_point_tag, mirror, true)?;
                debug!(tag = %self.config.fork_point_tag, "advanced fork point");
                Ok(())
            }
            RebaseOutcome::Conflict(output) => Err(SyncError::RebaseConflict {
                branch: work.clone(),
                onto: mirror.clone(),
                output,
            }),
        }
    }

    fn work_contains_mirror(&self) -> SyncResult<bool> {
        self.repo
            .is_ancestor(&self.config.mirror_branch, &self.config.work_branch)
    }

    /// Moves the fork point to the mirror tip. Only valid once the work
    /// branch contains that tip, e.g. after a conflicted rebase was
    /// finished by hand.
    fn settle_fork_point(&self) -> SyncResult<()> {
        let tag = &self.config.fork_point_tag;
        let mirror = &self.config.mirror_branch;
        if self.repo.resolve_ref(tag)? != self.repo.resolve_ref(mirror)? {
            info!(tag = %tag, "work branch already contains the mirror tip, advancing fork point");
            self.repo.tag(tag, mirror, true)?;
        }
        Ok(())
    }

    /// Points the work branch at the mirror tip once their trees match.
    fn fast_forward_work(&mut self) -> SyncResult<()> {
        self.state = SyncState::Rebasing;
        let mirror = &self.config.mirror_branch;
        let work = &self.config.work_branch;
        self.repo.switch(mirror)?;
        self.repo.force_branch(work, mirror)?;
        self.repo.tag(&self.config.fork_point_tag, mirror, true)?;
        self.repo.switch(work)
    }

    /// Deletes a remote path. Folders go through the confirmation policy;
    /// a dry run only logs.
    fn delete_remote(
        &mut self,
        path: &str,
        folder_only: bool,
        report: &mut PushReport,
    ) -> SyncResult<()> {
        let object = match self.client.resolve(path) {
            Ok(object) => object,
            Err(SyncError::NotFound { .. }) => {
                warn!(path = %path, "already absent remotely, skipping delete");
                report.missing_deletes.push(path.to_string());
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if folder_only && !object.is_folder() {
            return Ok(());
        }
        if object.is_folder() {
            if self.config.dry_run {
                info!(path = %path, "would ask to delete folder; skipped in dry run");
                report.skipped_folder_deletes.push(path.to_string());
                return Ok(());
            }
            if !self.confirm.confirm_folder_delete(path) {
                info!(path = %path, "folder delete not confirmed, skipping");
                report.skipped_folder_deletes.push(path.to_string());
                return Ok(());
            }
        }
        if self.config.dry_run {
            info!(path = %path, kind = %object.kind, "would delete");
        } else {
            self.client.delete(&object)?;
        }
        report.deleted.push(path.to_string());
        Ok(())
    }

    /// Removes empty local directories with no remote folder counterpart.
    fn prune_local(&mut self, dry_run: bool) -> SyncResult<Vec<String>> {
        let remote: HashSet<String> = self.client.folder_paths()?.into_iter().collect();
        let root = self.repo.root().to_path_buf();
        let mut pruned = Vec::new();
        prune_empty_dirs(&root, &root, &remote, dry_run, &mut pruned)?;
        Ok(pruned)
    }
}

fn check_versions(recorded: u64, remote: u64) -> SyncResult<()> {
    if recorded > remote {
        return Err(SyncError::InvariantViolation(format!(
            "local mirror records version {} but the remote is at {}",
            recorded, remote
        )));
    }
    Ok(())
}

/// Walks `dir` depth-first, removing directories that end up empty and are
/// not remote folders. Returns true if `dir` itself would be left empty.
fn prune_empty_dirs(
    root: &Path,
    dir: &Path,
    remote: &HashSet<String>,
    dry_run: bool,
    pruned: &mut Vec<String>,
) -> SyncResult<bool> {
    let mut empty = true;
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name();
        if dir == root && (name == ".git" || name == SESSION_DIR_NAME) {
            empty = false;
            continue;
        }
        if !entry.file_type()?.is_dir() {
            empty = false;
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let child_empty = prune_empty_dirs(root, &path, remote, dry_run, pruned)?;
        if child_empty && !remote.contains(&relative) {
            if dry_run {
                info!(path = %relative, "would prune local folder");
            } else {
                info!(path = %relative, "pruning local folder");
                fs::remove_dir(&path)?;
            }
            pruned.push(relative);
        } else {
            empty = false;
        }
    }
    Ok(empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRemote;
    use leafsync_protocol::Author;

    fn alice() -> Author {
        Author::new("u1", "Alice", "Smith", "alice@example.com")
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start());
        assert!(!SyncState::Failed.can_start());
        assert!(!SyncState::Pulling.can_start());

        assert!(SyncState::Pulling.is_active());
        assert!(SyncState::Rebasing.is_active());
        assert!(SyncState::Pushing.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Failed.is_active());
    }

    #[test]
    fn uninitialized_directory_fails_and_blocks_further_runs() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        remote.edit(&alice(), "main.tex", "hello\n");
        remote.seal();

        let mut engine =
            SyncEngine::new(SyncConfig::new(), &remote, GitRepository::new(dir.path()));
        assert_eq!(engine.state(), SyncState::Idle);
        assert!(matches!(engine.pull(), Err(SyncError::NotInitialized(_))));
        assert_eq!(engine.state(), SyncState::Failed);
        assert!(matches!(
            engine.push(),
            Err(SyncError::InvariantViolation(_))
        ));

        engine.reset();
        assert_eq!(engine.state(), SyncState::Idle);
    }

    #[test]
    fn init_refuses_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(SESSION_DIR_NAME)).unwrap();
        fs::write(dir.path().join("notes.txt"), "mine").unwrap();
        let remote = MockRemote::new();
        remote.edit(&alice(), "main.tex", "hello\n");
        remote.seal();

        let mut engine =
            SyncEngine::new(SyncConfig::new(), &remote, GitRepository::new(dir.path()));
        match engine.init(false) {
            Err(SyncError::DirtyWorkingTree(msg)) => assert!(msg.contains("notes.txt")),
            other => panic!("expected DirtyWorkingTree, got {:?}", other),
        }
        assert!(!dir.path().join(".git").exists());
    }

    #[test]
    fn prune_keeps_remote_folders_and_special_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join(SESSION_DIR_NAME)).unwrap();
        fs::create_dir_all(root.join("figures")).unwrap();
        fs::create_dir_all(root.join("old/deeper")).unwrap();
        fs::create_dir_all(root.join("chapters")).unwrap();
        fs::write(root.join("chapters/one.tex"), "x").unwrap();

        let remote: HashSet<String> = ["figures".to_string()].into_iter().collect();
        let mut pruned = Vec::new();
        prune_empty_dirs(root, root, &remote, true, &mut pruned).unwrap();
        assert_eq!(pruned, vec!["old/deeper", "old"]);
        assert!(root.join("old/deeper").exists());

        pruned.clear();
        prune_empty_dirs(root, root, &remote, false, &mut pruned).unwrap();
        assert_eq!(pruned, vec!["old/deeper", "old"]);
        assert!(!root.join("old").exists());
        assert!(root.join("figures").exists());
        assert!(root.join("chapters/one.tex").exists());
        assert!(root.join(".git/objects").exists());
    }

    #[test]
    fn version_check_rejects_local_ahead() {
        assert!(check_versions(3, 3).is_ok());
        assert!(check_versions(3, 5).is_ok());
        assert!(matches!(
            check_versions(6, 5),
            Err(SyncError::InvariantViolation(_))
        ));
    }

    #[test]
    fn report_display() {
        let report = PullReport::new(4, false);
        assert_eq!(report.to_string(), "already up to date at version 4");

        let mut push = PushReport::new(4, true);
        push.nothing_to_push = true;
        assert_eq!(push.to_string(), "[dry run] nothing to push");
        assert_eq!(version_tag(12), "v12");
    }
}
