//! `sync`: pull, then push.

use super::open_engine;
use crate::RunFlags;
use leafsync_engine::SyncResult;
use std::path::Path;

/// Syncs the checkout at `dir` in both directions.
pub fn run(dir: &Path, flags: &RunFlags) -> SyncResult<()> {
    let mut engine = open_engine(dir, flags)?;
    let report = engine.sync()?;
    println!("{}", report);
    Ok(())
}
