//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-checkout session directory.
pub const SESSION_DIR_NAME: &str = ".leafsync";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Append-only branch replaying remote history.
    pub mirror_branch: String,
    /// Branch the user edits, rebased onto the mirror.
    pub work_branch: String,
    /// Tag marking the mirror commit the work branch last forked from.
    pub fork_point_tag: String,
    /// Report what a run would change without changing anything.
    pub dry_run: bool,
    /// Stash uncommitted work-branch changes around a run.
    pub stash: bool,
    /// Remove empty folders that exist on only one side.
    pub prune: bool,
    /// Minimum delay between snapshot downloads.
    pub snapshot_interval: Duration,
    /// Minimum delay between upload/delete/create calls.
    pub mutation_interval: Duration,
    /// Longest a caller waits on a rate gate before getting `RateLimited`.
    pub rate_limit_timeout: Duration,
    /// Retry configuration for rate-limited calls.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration with default branch names.
    pub fn new() -> Self {
        Self {
            mirror_branch: "mirror".into(),
            work_branch: "work".into(),
            fork_point_tag: "fork-point".into(),
            dry_run: false,
            stash: true,
            prune: false,
            snapshot_interval: Duration::from_secs(120),
            mutation_interval: Duration::from_millis(4500),
            rate_limit_timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the branch names.
    pub fn with_branches(mut self, mirror: impl Into<String>, work: impl Into<String>) -> Self {
        self.mirror_branch = mirror.into();
        self.work_branch = work.into();
        self
    }

    /// Enables or disables dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enables or disables stashing.
    pub fn with_stash(mut self, stash: bool) -> Self {
        self.stash = stash;
        self
    }

    /// Enables or disables empty-folder pruning.
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Sets both rate-gate intervals.
    pub fn with_rate_intervals(mut self, snapshot: Duration, mutation: Duration) -> Self {
        self.snapshot_interval = snapshot;
        self.mutation_interval = mutation;
        self
    }

    /// Sets the rate-gate wait ceiling.
    pub fn with_rate_limit_timeout(mut self, timeout: Duration) -> Self {
        self.rate_limit_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before `attempt` when the remote asked for at least `retry_after`.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Duration) -> Duration {
        self.delay_for_attempt(attempt)
            .max(retry_after)
            .min(self.max_delay.max(retry_after))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Credentials and project coordinates persisted per checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Base URL of the remote service, without trailing slash.
    pub base_url: String,
    /// Remote project id.
    pub project_id: String,
    /// Login email.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl ProjectConfig {
    /// Path of the config file inside a checkout.
    pub fn path_in(worktree: &Path) -> PathBuf {
        worktree.join(SESSION_DIR_NAME).join("config.json")
    }

    /// Loads the config of a checkout.
    pub fn load(worktree: &Path) -> SyncResult<Self> {
        let path = Self::path_in(worktree);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SyncError::NotInitialized(format!(
                "no session config at {}; run `init` first",
                path.display()
            )),
            _ => SyncError::Io(e),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            SyncError::NotInitialized(format!("unreadable session config {}: {}", path.display(), e))
        })
    }

    /// Writes the config, creating the session directory and its `.gitignore`.
    pub fn save(&self, worktree: &Path) -> SyncResult<()> {
        let dir = worktree.join(SESSION_DIR_NAME);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(".gitignore"), "*\n")?;
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| SyncError::InvariantViolation(format!("config serialization: {}", e)))?;
        fs::write(Self::path_in(worktree), body)?;
        Ok(())
    }

    /// URL of the project page.
    pub fn project_url(&self) -> String {
        format!("{}/project/{}", self.base_url.trim_end_matches('/'), self.project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_branches("remote", "main")
            .with_dry_run(true)
            .with_stash(false)
            .with_prune(true)
            .with_rate_intervals(Duration::ZERO, Duration::from_millis(10))
            .with_rate_limit_timeout(Duration::from_secs(1));

        assert_eq!(config.mirror_branch, "remote");
        assert_eq!(config.work_branch, "main");
        assert_eq!(config.fork_point_tag, "fork-point");
        assert!(config.dry_run);
        assert!(!config.stash);
        assert!(config.prune);
        assert_eq!(config.snapshot_interval, Duration::ZERO);
        assert_eq!(config.mutation_interval, Duration::from_millis(10));
        assert_eq!(config.rate_limit_timeout, Duration::from_secs(1));
    }

    #[test]
    fn default_rate_windows() {
        let config = SyncConfig::default();
        assert_eq!(config.snapshot_interval, Duration::from_secs(120));
        assert_eq!(config.mutation_interval, Duration::from_millis(4500));
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max_and_hint() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
        // A server hint longer than the backoff ceiling still wins.
        assert_eq!(
            config.delay_with_hint(1, Duration::from_secs(30)),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.delay_with_hint(2, Duration::from_millis(10)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn project_config_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig {
            base_url: "https://latex.example.com/".into(),
            project_id: "abc123".into(),
            username: "ada@example.com".into(),
            password: "secret".into(),
        };

        config.save(dir.path()).unwrap();
        let ignore = fs::read_to_string(dir.path().join(SESSION_DIR_NAME).join(".gitignore")).unwrap();
        assert_eq!(ignore.trim(), "*");

        let loaded = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.project_url(), "https://latex.example.com/project/abc123");
    }

    #[test]
    fn missing_config_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::NotInitialized(_)));
    }
}
