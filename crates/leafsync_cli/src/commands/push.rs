//! `push`: send work-branch commits to the remote.

use super::open_engine;
use crate::RunFlags;
use leafsync_engine::SyncResult;
use std::path::Path;

/// Pushes the checkout at `dir`.
pub fn run(dir: &Path, flags: &RunFlags) -> SyncResult<()> {
    let mut engine = open_engine(dir, flags)?;
    let report = engine.push()?;
    println!("{}", report);
    if let Some(pull) = &report.pull {
        if !pull.commits.is_empty() {
            println!("  confirmed as {}", pull);
        }
    }
    Ok(())
}
