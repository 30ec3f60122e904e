//! # leafsync Protocol
//!
//! Data model and wire decoding for the remote revision-history service.
//!
//! This crate provides:
//! - `Revision` and `Author` for the remote's linear version history
//! - `FiletreeDiffEntry` for structural changes between two versions
//! - `DiffOp` fragments and content reconstruction
//! - `FolderNode` / `IdIndex` for resolving paths to remote object ids
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod diff;
mod error;
mod revision;
mod tree;

pub use diff::{
    contributors, decode_file_diff, decode_filetree_diff, reconstruct, DiffKind, DiffOp,
    FiletreeDiffEntry, FiletreeOperation,
};
pub use error::{ProtocolError, ProtocolResult};
pub use revision::{
    revisions_after, version_gaps, Author, Revision, RevisionPage, VersionGap, UNKNOWN_AUTHOR,
};
pub use tree::{
    decode_root_folder, empty_folders, normalize_path, parent_path, FolderNode, IdIndex,
    RemoteObjectId, RemoteObjectKind, TreeEntry,
};
