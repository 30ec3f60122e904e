//! Error types for the sync engine.

use leafsync_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No local session state exists yet.
    #[error("project not initialized: {0}")]
    NotInitialized(String),

    /// `init` was run against an existing repository.
    #[error("repository already initialized at {0}")]
    AlreadyInitialized(String),

    /// Expected branches or tags are missing.
    #[error("repository corrupted: {0}")]
    RepositoryCorrupted(String),

    /// Network or service error talking to the remote.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote (or a local rate gate) refused the call for now.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// How long to wait before the next attempt.
        retry_after: Duration,
    },

    /// The remote reports zero revisions.
    #[error("remote project has no revisions")]
    EmptyHistory,

    /// A path has no remote object.
    #[error("remote path not found: `{path}`")]
    NotFound {
        /// The path that failed to resolve.
        path: String,
    },

    /// A version-control command failed.
    #[error("`git {command}` failed (exit code {exit_code:?}): {stderr}")]
    VersionControlFailure {
        /// Arguments of the failed command.
        command: String,
        /// Exit code, if the process ran at all.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// Rebasing the work branch stopped on conflicts.
    #[error("rebase of `{branch}` onto `{onto}` stopped on conflicts; resolve them and run `git rebase --continue`\n{output}")]
    RebaseConflict {
        /// Branch being rebased.
        branch: String,
        /// Branch rebased onto.
        onto: String,
        /// Output of the rebase command.
        output: String,
    },

    /// Refusing to run with uncommitted changes.
    #[error("working tree of `{0}` has uncommitted changes; commit them or enable stashing")]
    DirtyWorkingTree(String),

    /// Push refused because the remote has unseen revisions.
    #[error("remote is at version {remote} but local mirror is at {local}; pull first")]
    RemoteAheadOfLocal {
        /// Locally recorded version.
        local: u64,
        /// Remote version.
        remote: u64,
    },

    /// A path-status line had a status the engine does not handle.
    #[error("unsupported path status `{status}` for `{path}`")]
    UnsupportedStatusKind {
        /// Raw status code.
        status: String,
        /// Path the status applies to.
        path: String,
    },

    /// An internal consistency check failed.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Remote payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot archive could not be read.
    #[error("archive error: {0}")]
    Archive(String),
}

impl SyncError {
    /// Creates a version-control failure for a command that could not be run.
    pub fn spawn_failure(command: impl Into<String>, err: &std::io::Error) -> Self {
        Self::VersionControlFailure {
            command: command.into(),
            exit_code: None,
            stderr: err.to_string(),
        }
    }

    /// Returns true if the caller may retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimited { .. } | SyncError::RemoteUnavailable(_)
        )
    }

    /// Stable process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::NotInitialized(_) => 1,
            SyncError::RepositoryCorrupted(_) => 2,
            SyncError::RemoteUnavailable(_) => 3,
            SyncError::RateLimited { .. } => 4,
            SyncError::VersionControlFailure { .. } => 5,
            SyncError::RebaseConflict { .. } => 6,
            SyncError::DirtyWorkingTree(_) => 7,
            SyncError::RemoteAheadOfLocal { .. } => 8,
            SyncError::AlreadyInitialized(_) => 9,
            SyncError::EmptyHistory => 10,
            SyncError::NotFound { .. } => 11,
            SyncError::UnsupportedStatusKind { .. } => 12,
            SyncError::InvariantViolation(_) => 13,
            SyncError::Protocol(_) => 14,
            SyncError::Io(_) => 15,
            SyncError::Archive(_) => 16,
        }
    }
}

impl From<zip::result::ZipError> for SyncError {
    fn from(err: zip::result::ZipError) -> Self {
        SyncError::Archive(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::RateLimited {
            retry_after: Duration::from_secs(5)
        }
        .is_retryable());
        assert!(SyncError::RemoteUnavailable("connection reset".into()).is_retryable());
        assert!(!SyncError::InvariantViolation("local ahead".into()).is_retryable());
        assert!(!SyncError::VersionControlFailure {
            command: "status".into(),
            exit_code: Some(128),
            stderr: "fatal".into(),
        }
        .is_retryable());
    }

    #[test]
    fn exit_codes_are_distinct() {
        let errors = vec![
            SyncError::NotInitialized("x".into()),
            SyncError::RepositoryCorrupted("x".into()),
            SyncError::RemoteUnavailable("x".into()),
            SyncError::RateLimited {
                retry_after: Duration::ZERO,
            },
            SyncError::VersionControlFailure {
                command: "x".into(),
                exit_code: None,
                stderr: String::new(),
            },
            SyncError::RebaseConflict {
                branch: "work".into(),
                onto: "mirror".into(),
                output: String::new(),
            },
            SyncError::DirtyWorkingTree("work".into()),
            SyncError::RemoteAheadOfLocal {
                local: 1,
                remote: 2,
            },
            SyncError::AlreadyInitialized("x".into()),
            SyncError::EmptyHistory,
            SyncError::NotFound { path: "x".into() },
            SyncError::UnsupportedStatusKind {
                status: "C".into(),
                path: "x".into(),
            },
            SyncError::InvariantViolation("x".into()),
            SyncError::Protocol(ProtocolError::AmbiguousFragment { tags: 0 }),
            SyncError::Io(std::io::Error::other("x")),
            SyncError::Archive("x".into()),
        ];

        let codes: HashSet<u8> = errors.iter().map(SyncError::exit_code).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn error_display() {
        let err = SyncError::RemoteAheadOfLocal {
            local: 10,
            remote: 12,
        };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("pull first"));

        let err = SyncError::VersionControlFailure {
            command: "switch work".into(),
            exit_code: Some(1),
            stderr: "invalid reference".into(),
        };
        assert!(err.to_string().contains("git switch work"));
    }
}
