//! `pull`: replay new remote revisions onto the mirror branch.

use super::open_engine;
use crate::RunFlags;
use leafsync_engine::SyncResult;
use std::path::Path;

/// Pulls the checkout at `dir`.
pub fn run(dir: &Path, flags: &RunFlags) -> SyncResult<()> {
    let mut engine = open_engine(dir, flags)?;
    let report = engine.pull()?;
    println!("{}", report);
    Ok(())
}
