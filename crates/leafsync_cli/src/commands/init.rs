//! `init`: record a project and replay its history into a new checkout.

use super::{connect, prompt};
use leafsync_engine::{GitRepository, ProjectConfig, SyncConfig, SyncEngine, SyncResult};
use std::path::Path;
use tracing::info;

/// Creates the checkout at `dir`.
///
/// The session config is written only after the history replay succeeds,
/// so a failed init leaves nothing behind to clean up.
pub fn run(
    dir: &Path,
    username: String,
    password: Option<String>,
    project: &str,
    base_url: &str,
    force: bool,
) -> SyncResult<()> {
    let password = match password {
        Some(password) => password,
        None => prompt("Password: ")?,
    };
    let config = ProjectConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        project_id: parse_project_id(project).to_string(),
        username,
        password,
    };
    info!(project = %config.project_url(), dir = %dir.display(), "initializing");

    let remote = connect(&config)?;
    let mut engine = SyncEngine::new(SyncConfig::new(), remote, GitRepository::new(dir));
    let report = engine.init(force)?;
    config.save(dir)?;

    println!("✓ Initialized {} from {}", dir.display(), config.project_url());
    println!("  {}", report);
    Ok(())
}

/// Accepts a bare project id or a project URL.
fn parse_project_id(project: &str) -> &str {
    let trimmed = project.trim().trim_end_matches('/');
    match trimmed.split_once("/project/") {
        Some((_, rest)) => rest.split(['/', '?', '#']).next().unwrap_or(rest),
        None => trimmed,
    }
}
