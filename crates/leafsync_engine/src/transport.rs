//! Transport layer abstraction for the remote service.

use crate::error::SyncResult;
use bytes::Bytes;
use leafsync_protocol::{DiffOp, FiletreeDiffEntry, FolderNode, RemoteObjectId, RevisionPage};

/// A remote transport performs the raw calls against the remote service.
///
/// This trait abstracts the network layer so the history client and the
/// coordinator can run against HTTP, or against the in-memory
/// [`MockRemote`](crate::MockRemote) in tests. Implementations do no
/// caching and no rate limiting; both live in
/// [`RemoteClient`](crate::RemoteClient).
pub trait RemoteTransport {
    /// Fetches one page of revisions, newest first, older than `before`.
    fn revisions_page(&self, before: Option<i64>) -> SyncResult<RevisionPage>;

    /// Fetches the changed paths between two versions.
    fn filetree_diff(&self, from: u64, to: u64) -> SyncResult<Vec<FiletreeDiffEntry>>;

    /// Fetches the fragment diff of one path between two versions.
    fn file_diff(&self, from: u64, to: u64, pathname: &str) -> SyncResult<Vec<DiffOp>>;

    /// Downloads the project archive at a version, or at head.
    fn download_archive(&self, version: Option<u64>) -> SyncResult<Bytes>;

    /// Fetches the authoritative folder/doc/file id tree.
    fn folder_tree(&self) -> SyncResult<FolderNode>;

    /// Uploads a file into a folder, replacing any object with that name.
    fn upload(&self, folder_id: &str, file_name: &str, contents: Bytes) -> SyncResult<()>;

    /// Creates a folder and returns its id.
    fn create_folder(&self, parent_id: &str, name: &str) -> SyncResult<String>;

    /// Deletes a doc, file or folder.
    fn delete(&self, object: &RemoteObjectId) -> SyncResult<()>;
}

impl<T: RemoteTransport + ?Sized> RemoteTransport for &T {
    fn revisions_page(&self, before: Option<i64>) -> SyncResult<RevisionPage> {
        (**self).revisions_page(before)
    }

    fn filetree_diff(&self, from: u64, to: u64) -> SyncResult<Vec<FiletreeDiffEntry>> {
        (**self).filetree_diff(from, to)
    }

    fn file_diff(&self, from: u64, to: u64, pathname: &str) -> SyncResult<Vec<DiffOp>> {
        (**self).file_diff(from, to, pathname)
    }

    fn download_archive(&self, version: Option<u64>) -> SyncResult<Bytes> {
        (**self).download_archive(version)
    }

    fn folder_tree(&self) -> SyncResult<FolderNode> {
        (**self).folder_tree()
    }

    fn upload(&self, folder_id: &str, file_name: &str, contents: Bytes) -> SyncResult<()> {
        (**self).upload(folder_id, file_name, contents)
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> SyncResult<String> {
        (**self).create_folder(parent_id, name)
    }

    fn delete(&self, object: &RemoteObjectId) -> SyncResult<()> {
        (**self).delete(object)
    }
}
