//! CLI command implementations.

pub mod init;
pub mod pull;
pub mod push;
pub mod sync;

use crate::net::{ReqwestClient, WsConnector};
use crate::RunFlags;
use leafsync_engine::{
    AlwaysAllow, ConfirmDelete, Credentials, GitRepository, HttpTransport, ProjectConfig,
    SyncConfig, SyncEngine, SyncError, SyncResult,
};
use reqwest::cookie::Jar;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

/// Transport used against the real service.
pub type Remote = HttpTransport<ReqwestClient, WsConnector>;

/// Builds a logged-in transport for a project.
pub fn connect(project: &ProjectConfig) -> SyncResult<Remote> {
    let jar = Arc::new(Jar::default());
    let client = ReqwestClient::new(Arc::clone(&jar))
        .map_err(|e| SyncError::RemoteUnavailable(format!("http client: {}", e)))?;
    let transport = HttpTransport::new(
        project.base_url.as_str(),
        project.project_id.as_str(),
        client,
        WsConnector::new(jar),
    );
    transport.login(&Credentials {
        email: project.username.clone(),
        password: project.password.clone(),
    })?;
    Ok(transport)
}

/// Opens the engine of an initialized checkout.
pub fn open_engine(dir: &Path, flags: &RunFlags) -> SyncResult<SyncEngine<Remote>> {
    let project = ProjectConfig::load(dir)?;
    let remote = connect(&project)?;
    let config = SyncConfig::new()
        .with_dry_run(flags.dry_run)
        .with_stash(!flags.no_stash)
        .with_prune(flags.prune);
    let engine = SyncEngine::new(config, remote, GitRepository::new(dir));
    Ok(if flags.yes {
        engine.with_confirm(AlwaysAllow)
    } else if io::stdin().is_terminal() {
        engine.with_confirm(StdinConfirm)
    } else {
        engine
    })
}

/// Asks on the terminal before each remote folder delete.
pub struct StdinConfirm;

impl ConfirmDelete for StdinConfirm {
    fn confirm_folder_delete(&self, path: &str) -> bool {
        eprint!(
            "Delete remote folder `{}` and everything in it? [y/N] ",
            path
        );
        let _ = io::stderr().flush();
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Reads one line from the terminal after printing `label`.
pub fn prompt(label: &str) -> SyncResult<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
