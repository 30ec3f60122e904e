//! Local repository adapter over the `git` command line.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use leafsync_protocol::Author;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, trace};

const CONFLICT_MARKER: &str = "CONFLICT";
const NO_LOCAL_CHANGES: &str = "No local changes to save";

/// Kind of a path-status entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Content changed.
    Modified,
    /// Path is new.
    Added,
    /// Path was removed.
    Deleted,
    /// Path moved to `new_path`.
    Renamed,
}

/// One line of a name-status diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Status kind.
    pub kind: StatusKind,
    /// Path (old path for renames).
    pub path: String,
    /// New path for renames.
    pub new_path: Option<String>,
}

impl StatusEntry {
    /// Creates a non-rename entry.
    pub fn new(kind: StatusKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            new_path: None,
        }
    }

    /// Creates a rename entry.
    pub fn renamed(path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Renamed,
            path: path.into(),
            new_path: Some(new_path.into()),
        }
    }
}

/// Parses `<status>\t<path>[\t<newPath>]` lines.
///
/// `M`, `A`, `D` and `R<score>` are understood; anything else (copies,
/// type changes, unmerged paths) is an `UnsupportedStatusKind` error.
pub fn parse_name_status(output: &str) -> SyncResult<Vec<StatusEntry>> {
    let mut entries = Vec::new();
    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        let mut fields = line.split('\t');
        let status = fields.next().unwrap_or_default();
        let path = fields.next().unwrap_or_default().to_string();
        let unsupported = || SyncError::UnsupportedStatusKind {
            status: status.to_string(),
            path: path.clone(),
        };
        if path.is_empty() {
            return Err(unsupported());
        }

        let entry = match status {
            "M" => StatusEntry::new(StatusKind::Modified, path.clone()),
            "A" => StatusEntry::new(StatusKind::Added, path.clone()),
            "D" => StatusEntry::new(StatusKind::Deleted, path.clone()),
            s if s.starts_with('R') && s[1..].chars().all(|c| c.is_ascii_digit()) => {
                let new_path = fields.next().ok_or_else(unsupported)?;
                StatusEntry::renamed(path.clone(), new_path)
            }
            _ => return Err(unsupported()),
        };
        entries.push(entry);
    }
    Ok(entries)
}

/// Result of a rebase attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Branch rebased cleanly.
    Success,
    /// Rebase stopped on conflicts; the repository is mid-rebase.
    Conflict(String),
}

/// A git working tree driven through the `git` executable.
#[derive(Debug, Clone)]
pub struct GitRepository {
    root: PathBuf,
    program: PathBuf,
}

impl GitRepository {
    /// Opens the working tree at `root`. Nothing is checked until the first
    /// command runs.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            program: PathBuf::from("git"),
        }
    }

    /// Uses a different git executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Root of the working tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true if `root/.git` exists.
    pub fn is_repository(&self) -> bool {
        self.root.join(".git").exists()
    }

    fn output(&self, args: &[&str]) -> SyncResult<Output> {
        trace!(args = ?args, "git");
        Command::new(&self.program)
            .arg("-C")
            .arg(&self.root)
            .args(["-c", "core.quotepath=off"])
            .args(args)
            .env("LC_ALL", "C")
            .output()
            .map_err(|e| SyncError::spawn_failure(args.join(" "), &e))
    }

    /// Runs a command, failing on a non-zero exit. Returns trimmed stdout.
    pub fn run(&self, args: &[&str]) -> SyncResult<String> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(SyncError::VersionControlFailure {
                command: args.join(" "),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        trace!(output = %stdout, "git output");
        Ok(stdout)
    }

    /// Runs a command whose failure is an expected outcome. Returns success
    /// and the combined stdout and stderr.
    fn run_unchecked(&self, args: &[&str]) -> SyncResult<(bool, String)> {
        let output = self.output(args)?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text.trim_end().to_string()))
    }

    /// Creates the repository with `initial_branch` checked out.
    pub fn init(&self, initial_branch: &str) -> SyncResult<()> {
        std::fs::create_dir_all(&self.root)?;
        debug!(root = %self.root.display(), branch = initial_branch, "initializing repository");
        self.run(&["init", "-q", "-b", initial_branch])?;
        Ok(())
    }

    /// Switches to an existing branch.
    pub fn switch(&self, branch: &str) -> SyncResult<()> {
        self.run(&["switch", "-q", branch])?;
        Ok(())
    }

    /// Creates a branch at HEAD and switches to it.
    pub fn create_and_switch(&self, branch: &str) -> SyncResult<()> {
        self.run(&["switch", "-q", "-c", branch])?;
        Ok(())
    }

    /// Points `branch` at `target`, creating or moving it.
    pub fn force_branch(&self, branch: &str, target: &str) -> SyncResult<()> {
        self.run(&["branch", "-f", branch, target])?;
        Ok(())
    }

    /// Name of the checked-out branch (empty when detached).
    pub fn current_branch(&self) -> SyncResult<String> {
        self.run(&["branch", "--show-current"])
    }

    /// Resolves a revision to a commit id, or `None` if it does not exist.
    pub fn resolve_ref(&self, rev: &str) -> SyncResult<Option<String>> {
        let revspec = format!("{}^{{commit}}", rev);
        let (ok, out) = self.run_unchecked(&["rev-parse", "--verify", "--quiet", &revspec])?;
        Ok(ok.then(|| out.trim().to_string()).filter(|id| !id.is_empty()))
    }

    /// Returns true if a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> SyncResult<bool> {
        Ok(self.resolve_ref(&format!("refs/heads/{}", branch))?.is_some())
    }

    /// Returns true if a tag exists.
    pub fn tag_exists(&self, tag: &str) -> SyncResult<bool> {
        Ok(self.resolve_ref(&format!("refs/tags/{}", tag))?.is_some())
    }

    /// Stages every change in the working tree, removals included.
    pub fn stage_all(&self) -> SyncResult<()> {
        self.run(&["add", "-A", "."])?;
        Ok(())
    }

    /// Commits the index with an explicit author and timestamp.
    ///
    /// The committer identity and date are set to the author's as well, so
    /// replaying the same remote history yields the same commits.
    pub fn commit(
        &self,
        message: &str,
        author: &Author,
        timestamp: DateTime<Utc>,
        allow_empty: bool,
    ) -> SyncResult<()> {
        let date = format!("@{} +0000", timestamp.timestamp());
        let ident = format!("{} <{}>", author.display_name, author.email);
        let author_arg = format!("--author={}", ident);
        let date_arg = format!("--date={}", date);

        let mut args = vec![
            "commit",
            "-q",
            "--no-verify",
            author_arg.as_str(),
            date_arg.as_str(),
            "-m",
            message,
        ];
        if allow_empty {
            args.push("--allow-empty");
        }

        trace!(message, author = %ident, "committing");
        let output = Command::new(&self.program)
            .arg("-C")
            .arg(&self.root)
            .args(["-c", "core.quotepath=off"])
            .args(&args)
            .env("LC_ALL", "C")
            .env("GIT_COMMITTER_NAME", &author.display_name)
            .env("GIT_COMMITTER_EMAIL", &author.email)
            .env("GIT_COMMITTER_DATE", &date)
            .output()
            .map_err(|e| SyncError::spawn_failure("commit", &e))?;
        if !output.status.success() {
            return Err(SyncError::VersionControlFailure {
                command: format!("commit -m {}", message),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Returns true if there are no staged, unstaged or untracked changes.
    pub fn is_working_tree_clean(&self) -> SyncResult<bool> {
        Ok(self.run(&["status", "--porcelain"])?.is_empty())
    }

    /// Stashes all changes, untracked files included. Returns false when
    /// there was nothing to stash.
    pub fn stash(&self) -> SyncResult<bool> {
        let out = self.run(&["stash", "push", "-u"])?;
        Ok(!out.starts_with(NO_LOCAL_CHANGES))
    }

    /// Restores the most recent stash.
    pub fn stash_pop(&self) -> SyncResult<()> {
        self.run(&["stash", "pop", "-q"])?;
        Ok(())
    }

    /// Rebases `branch` onto `onto`.
    ///
    /// A conflict is reported through [`RebaseOutcome::Conflict`] and leaves
    /// the rebase in progress. Any other failure is a command error.
    pub fn rebase(&self, onto: &str, branch: &str) -> SyncResult<RebaseOutcome> {
        let (ok, output) = self.run_unchecked(&["rebase", onto, branch])?;
        if output.contains(CONFLICT_MARKER) {
            return Ok(RebaseOutcome::Conflict(output));
        }
        if !ok {
            return Err(SyncError::VersionControlFailure {
                command: format!("rebase {} {}", onto, branch),
                exit_code: None,
                stderr: output,
            });
        }
        Ok(RebaseOutcome::Success)
    }

    /// Creates a lightweight tag, replacing an existing one when `force`.
    pub fn tag(&self, name: &str, target: &str, force: bool) -> SyncResult<()> {
        if force {
            self.run(&["tag", "-f", name, target])?;
        } else {
            self.run(&["tag", name, target])?;
        }
        Ok(())
    }

    /// Path changes from `base` to `target`, renames detected.
    pub fn path_status_since(&self, base: &str, target: &str) -> SyncResult<Vec<StatusEntry>> {
        let out = self.run(&["diff", "--name-status", "-M", base, target])?;
        parse_name_status(&out)
    }

    /// Number of commits on `target` that are not on `base`.
    pub fn commits_between(&self, base: &str, target: &str) -> SyncResult<u64> {
        let range = format!("{}..{}", base, target);
        let out = self.run(&["rev-list", "--count", &range])?;
        out.trim()
            .parse()
            .map_err(|_| SyncError::InvariantViolation(format!("rev-list printed `{}`", out)))
    }

    /// Paths tracked in the index.
    pub fn list_tracked_paths(&self) -> SyncResult<Vec<String>> {
        Ok(self
            .run(&["ls-files"])?
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Full message of the tip commit of `rev`.
    pub fn last_commit_message(&self, rev: &str) -> SyncResult<String> {
        self.run(&["log", "-1", "--pretty=%B", rev])
    }

    /// Author name and email of the tip commit of `rev`.
    pub fn last_commit_author(&self, rev: &str) -> SyncResult<(String, String)> {
        let out = self.run(&["log", "-1", "--pretty=%an%n%ae", rev])?;
        let mut lines = out.lines();
        let name = lines.next().unwrap_or_default().to_string();
        let email = lines.next().unwrap_or_default().to_string();
        Ok((name, email))
    }

    /// Messages of all commits on `rev`, oldest first.
    pub fn commit_messages(&self, rev: &str) -> SyncResult<Vec<String>> {
        Ok(self
            .run(&["log", "--reverse", "--pretty=%s", rev])?
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Raw contents of `path` as committed on `rev`.
    pub fn read_blob(&self, rev: &str, path: &str) -> SyncResult<Vec<u8>> {
        let object = format!("{}:{}", rev, path);
        let args = ["cat-file", "blob", object.as_str()];
        let output = self.output(&args)?;
        if !output.status.success() {
            return Err(SyncError::VersionControlFailure {
                command: args.join(" "),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Returns true if `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> SyncResult<bool> {
        let args = ["merge-base", "--is-ancestor", ancestor, descendant];
        let output = self.output(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            exit_code => Err(SyncError::VersionControlFailure {
                command: args.join(" "),
                exit_code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    /// Returns true if the two revisions have identical trees.
    pub fn trees_identical(&self, a: &str, b: &str) -> SyncResult<bool> {
        Ok(self.run(&["diff-tree", "-r", a, b])?.is_empty())
    }

    /// Remote version recorded by the tip of `branch`.
    ///
    /// Every mirror commit is titled `"{from}->{to}"`; the tip's `to` is
    /// the last replayed remote version.
    pub fn recorded_version(&self, branch: &str) -> SyncResult<u64> {
        let message = self.last_commit_message(branch)?;
        parse_recorded_version(&message).ok_or_else(|| {
            SyncError::RepositoryCorrupted(format!(
                "tip of `{}` is not a mirror commit: `{}`",
                branch,
                message.lines().next().unwrap_or_default()
            ))
        })
    }
}

/// Parses the `to` version out of a `"{from}->{to}"` commit title.
pub fn parse_recorded_version(message: &str) -> Option<u64> {
    let title = message.lines().next()?.trim();
    let (from, to) = title.split_once("->")?;
    from.trim().parse::<u64>().ok()?;
    to.trim().parse().ok()
}
