//! # Leafsync Engine
//!
//! Two-way synchronization between a remote collaborative project and a
//! local git checkout.
//!
//! This crate provides:
//! - Remote history client with revision caching and rate gates
//! - HTTP transport over pluggable request and socket seams
//! - Revision replay onto a mirror branch, split per author
//! - Local repository adapter driving the `git` executable
//! - Push classification of local changes into remote uploads and deletes
//! - Sync coordinator (idle → pulling → rebasing → pushing)
//!
//! ## Architecture
//!
//! The local repository holds two branches:
//! 1. `mirror` receives exactly one commit per remote revision (or per
//!    single-author span inside one), never edited by hand
//! 2. `work` is where the user commits; it is rebased onto `mirror`
//!    after every pull
//!
//! A `fork-point` tag marks the mirror commit `work` was last rebased onto.
//! Pushes send the path changes between `fork-point` and `work`.
//!
//! ## Key Invariants
//!
//! - The remote is authoritative
//! - The recorded version never exceeds the remote's latest version
//! - The fork point only moves after a clean rebase
//! - Deletes are sent before uploads
//! - Conflicts are never resolved automatically

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changeset;
mod client;
mod config;
mod confirm;
mod error;
mod http;
mod mock;
mod rate_limit;
mod replay;
mod repo;
mod state;
mod transport;

pub use changeset::PendingChangeSet;
pub use client::RemoteClient;
pub use config::{ProjectConfig, RetryConfig, SyncConfig, SESSION_DIR_NAME};
pub use confirm::{AlwaysAllow, AlwaysDeny, ConfirmDelete};
pub use error::{SyncError, SyncResult};
pub use http::{
    Credentials, HttpBody, HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    SocketConnector, SocketSession,
};
pub use mock::{MockRemote, RemoteCall};
pub use rate_limit::RateGate;
pub use replay::{choose_path, local_path, ReplayPath, ReplayedCommit, Replayer};
pub use repo::{
    parse_name_status, parse_recorded_version, GitRepository, RebaseOutcome, StatusEntry,
    StatusKind,
};
pub use state::{version_tag, PullReport, PushReport, SyncEngine, SyncReport, SyncState};
pub use transport::RemoteTransport;
