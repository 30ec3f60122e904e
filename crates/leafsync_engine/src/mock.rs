//! In-memory simulated remote.
//!
//! [`MockRemote`] keeps the full per-version history of a project and
//! answers every [`RemoteTransport`] call from it, the way the real service
//! would. Tests drive it through an editing API (`edit`, `remove`,
//! `rename`, `seal`, ...) and inspect the mutations the engine sent.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteTransport;
use bytes::Bytes;
use leafsync_protocol::{
    normalize_path, parent_path, Author, DiffOp, FiletreeDiffEntry, FiletreeOperation, FolderNode,
    RemoteObjectId, RemoteObjectKind, Revision, RevisionPage, TreeEntry,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const START_CLOCK_MS: i64 = 1_700_000_000_000;
const STEP_MS: i64 = 1_000;
const ROOT_ID: &str = "root";

/// A mutation the engine performed against the mock, by project path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// A folder was created.
    CreateFolder(String),
    /// A file was uploaded.
    Upload(String),
    /// A doc, file or folder was deleted.
    Delete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MockFile {
    content: Vec<u8>,
    editable: bool,
}

type Snapshot = BTreeMap<String, MockFile>;

#[derive(Debug, Clone)]
struct Step {
    author: Author,
    timestamp_ms: i64,
    touched: BTreeSet<String>,
    renames: Vec<(String, String)>,
}

#[derive(Debug)]
struct MockState {
    /// `snapshots[v]` is the project at version `v`.
    snapshots: Vec<Snapshot>,
    /// `steps[v - 1]` produced version `v`.
    steps: Vec<Step>,
    /// Sealed revisions, oldest first.
    revisions: Vec<Revision>,
    sealed_to: u64,
    folders: BTreeSet<String>,
    ids: HashMap<String, String>,
    next_id: u64,
    clock_ms: i64,
    page_size: usize,
    pusher: Author,
    calls: Vec<RemoteCall>,
    page_requests: usize,
    tree_requests: usize,
    archive_requests: usize,
}

impl MockState {
    fn version(&self) -> u64 {
        self.steps.len() as u64
    }

    fn head(&self) -> &Snapshot {
        // `snapshots` always holds version 0.
        &self.snapshots[self.snapshots.len() - 1]
    }

    fn snapshot(&self, version: u64) -> SyncResult<&Snapshot> {
        self.snapshots
            .get(version as usize)
            .ok_or_else(|| SyncError::RemoteUnavailable(format!("no version {}", version)))
    }

    fn id_for(&mut self, path: &str) -> String {
        if path.is_empty() {
            return ROOT_ID.to_string();
        }
        if let Some(id) = self.ids.get(path) {
            return id.clone();
        }
        self.next_id += 1;
        let id = format!("id{}", self.next_id);
        self.ids.insert(path.to_string(), id.clone());
        id
    }

    fn path_of(&self, id: &str) -> Option<String> {
        if id == ROOT_ID {
            return Some(String::new());
        }
        self.ids
            .iter()
            .find(|(_, known)| known.as_str() == id)
            .map(|(path, _)| path.clone())
    }

    fn step(&mut self, author: &Author, apply: impl FnOnce(&mut Snapshot, &mut Step)) {
        self.clock_ms += STEP_MS;
        let mut snapshot = self.head().clone();
        let mut step = Step {
            author: author.clone(),
            timestamp_ms: self.clock_ms,
            touched: BTreeSet::new(),
            renames: Vec::new(),
        };
        apply(&mut snapshot, &mut step);
        // Folders outlive their files, as they do remotely.
        for path in snapshot.keys() {
            let mut parent = parent_path(path);
            while !parent.is_empty() {
                self.folders.insert(parent.to_string());
                parent = parent_path(parent);
            }
        }
        self.snapshots.push(snapshot);
        self.steps.push(step);
    }

    fn seal(&mut self) -> Option<Revision> {
        let to_v = self.version();
        if to_v == self.sealed_to {
            return None;
        }
        let from_v = self.sealed_to;
        let steps = &self.steps[from_v as usize..to_v as usize];
        let mut users: Vec<Author> = Vec::new();
        for step in steps {
            if !users.iter().any(|u| u.id == step.author.id) {
                users.push(step.author.clone());
            }
        }
        let timestamp_ms = steps.last().map_or(self.clock_ms, |s| s.timestamp_ms);
        let revision = Revision::new(from_v, to_v, timestamp_ms, users);
        self.revisions.push(revision.clone());
        self.sealed_to = to_v;
        Some(revision)
    }

    fn window_steps(&self, from: u64, to: u64) -> &[Step] {
        &self.steps[from as usize..to as usize]
    }

    fn check_window(&self, from: u64, to: u64) -> SyncResult<()> {
        if from >= to || to > self.version() {
            return Err(SyncError::RemoteUnavailable(format!(
                "invalid window {}->{} (head {})",
                from,
                to,
                self.version()
            )));
        }
        Ok(())
    }

    /// Renames in the window, chained, keyed by final path.
    fn renames(&self, from: u64, to: u64) -> BTreeMap<String, String> {
        let mut chains: BTreeMap<String, String> = BTreeMap::new();
        for step in self.window_steps(from, to) {
            for (old, new) in &step.renames {
                let origin = chains.remove(old).unwrap_or_else(|| old.clone());
                chains.insert(new.clone(), origin);
            }
        }
        let before = &self.snapshots[from as usize];
        let after = &self.snapshots[to as usize];
        chains.retain(|new, origin| {
            before.contains_key(origin) && after.contains_key(new) && !after.contains_key(origin)
        });
        chains
    }

    fn folder_node(&mut self, path: &str, name: &str) -> FolderNode {
        let id = self.id_for(path);
        let mut node = FolderNode::new(id, name);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let mut subfolders: BTreeSet<String> = BTreeSet::new();
        let mut entries: Vec<(String, bool)> = Vec::new();
        let implied = self
            .head()
            .iter()
            .map(|(p, f)| (p.clone(), Some(f.editable)))
            .chain(self.folders.iter().map(|p| (p.clone(), None)))
            .collect::<Vec<_>>();
        for (full, editable) in implied {
            let Some(rest) = full.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((first, _)) => {
                    subfolders.insert(first.to_string());
                }
                None => match editable {
                    Some(editable) => entries.push((rest.to_string(), editable)),
                    None => {
                        subfolders.insert(rest.to_string());
                    }
                },
            }
        }

        for sub in subfolders {
            let sub_path = format!("{}{}", prefix, sub);
            node.folders.push(self.folder_node(&sub_path, &sub));
        }
        for (name, editable) in entries {
            let entry = TreeEntry::new(self.id_for(&format!("{}{}", prefix, name)), name);
            if editable {
                node.docs.push(entry);
            } else {
                node.file_refs.push(entry);
            }
        }
        node
    }
}

/// In-memory remote project with full version history.
#[derive(Debug)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    /// Creates an empty project at version 0.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                snapshots: vec![Snapshot::new()],
                steps: Vec::new(),
                revisions: Vec::new(),
                sealed_to: 0,
                folders: BTreeSet::new(),
                ids: HashMap::new(),
                next_id: 0,
                clock_ms: START_CLOCK_MS,
                page_size: 100,
                pusher: Author::new("pusher", "Local", "User", "local@example.com"),
                calls: Vec::new(),
                page_requests: 0,
                tree_requests: 0,
                archive_requests: 0,
            }),
        }
    }

    /// Sets how many revisions a page returns.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state.lock().page_size = page_size.max(1);
        self
    }

    /// Sets the author recorded for mutations made through the transport.
    pub fn with_pusher(self, pusher: Author) -> Self {
        self.state.lock().pusher = pusher;
        self
    }

    /// Writes a text file as one version step.
    pub fn edit(&self, author: &Author, path: &str, content: &str) {
        self.write(author, path, content.as_bytes().to_vec(), true);
    }

    /// Writes a binary (non-editable) file as one version step.
    pub fn add_binary(&self, author: &Author, path: &str, content: &[u8]) {
        self.write(author, path, content.to_vec(), false);
    }

    fn write(&self, author: &Author, path: &str, content: Vec<u8>, editable: bool) {
        let path = normalize_path(path);
        self.state.lock().step(author, |snapshot, step| {
            snapshot.insert(path.clone(), MockFile { content, editable });
            step.touched.insert(path);
        });
    }

    /// Removes a file as one version step.
    pub fn remove(&self, author: &Author, path: &str) {
        let path = normalize_path(path);
        self.state.lock().step(author, |snapshot, step| {
            snapshot.remove(&path);
            step.touched.insert(path);
        });
    }

    /// Renames a file as one version step.
    pub fn rename(&self, author: &Author, from: &str, to: &str) {
        let (from, to) = (normalize_path(from), normalize_path(to));
        self.state.lock().step(author, |snapshot, step| {
            if let Some(file) = snapshot.remove(&from) {
                snapshot.insert(to.clone(), file);
                step.touched.insert(from.clone());
                step.touched.insert(to.clone());
                step.renames.push((from, to));
            }
        });
    }

    /// Records a version step that changes nothing.
    pub fn touch(&self, author: &Author) {
        self.state.lock().step(author, |_, _| {});
    }

    /// Adds an empty folder. Folders are not versioned.
    pub fn add_folder(&self, path: &str) {
        self.state.lock().folders.insert(normalize_path(path));
    }

    /// Groups all unsealed steps into one revision.
    pub fn seal(&self) -> Option<Revision> {
        self.state.lock().seal()
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.state.lock().version()
    }

    /// Contents of a file at head.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .head()
            .get(&normalize_path(path))
            .map(|f| f.content.clone())
    }

    /// Paths of all files at head.
    pub fn files(&self) -> Vec<String> {
        self.state.lock().head().keys().cloned().collect()
    }

    /// Paths of all folders.
    pub fn folders(&self) -> Vec<String> {
        self.state.lock().folders.iter().cloned().collect()
    }

    /// Mutations received through the transport, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Forgets recorded mutations.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of revision pages served.
    pub fn page_requests(&self) -> usize {
        self.state.lock().page_requests
    }

    /// Number of folder trees served.
    pub fn tree_requests(&self) -> usize {
        self.state.lock().tree_requests
    }

    /// Number of archives served.
    pub fn archive_requests(&self) -> usize {
        self.state.lock().archive_requests
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn diff_text(old: &str, new: &str, users: &[Author], end_ts: i64) -> Vec<DiffOp> {
    if old == new {
        return if old.is_empty() {
            Vec::new()
        } else {
            vec![DiffOp::unchanged(old)]
        };
    }

    let prefix = old
        .char_indices()
        .zip(new.chars())
        .take_while(|((_, a), b)| a == b)
        .last()
        .map_or(0, |((i, c), _)| i + c.len_utf8());
    let (old_rest, new_rest) = (&old[prefix..], &new[prefix..]);
    let suffix = old_rest
        .chars()
        .rev()
        .zip(new_rest.chars().rev())
        .take_while(|(a, b)| a == b)
        .map(|(c, _)| c.len_utf8())
        .sum::<usize>();

    let mut ops = Vec::new();
    if prefix > 0 {
        ops.push(DiffOp::unchanged(&old[..prefix]));
    }
    let removed = &old_rest[..old_rest.len() - suffix];
    if !removed.is_empty() {
        ops.push(DiffOp::deleted(removed, users.to_vec(), end_ts));
    }
    let inserted = &new_rest[..new_rest.len() - suffix];
    if !inserted.is_empty() {
        ops.push(DiffOp::inserted(inserted, users.to_vec(), end_ts));
    }
    if suffix > 0 {
        ops.push(DiffOp::unchanged(&old_rest[old_rest.len() - suffix..]));
    }
    ops
}

impl RemoteTransport for MockRemote {
    fn revisions_page(&self, before: Option<i64>) -> SyncResult<RevisionPage> {
        let mut state = self.state.lock();
        state.page_requests += 1;
        let older: Vec<Revision> = state
            .revisions
            .iter()
            .rev()
            .filter(|rev| before.map_or(true, |ts| rev.timestamp_ms < ts))
            .cloned()
            .collect();
        let updates: Vec<Revision> = older.iter().take(state.page_size).cloned().collect();
        let next_before_timestamp = if older.len() > updates.len() {
            updates.last().map(|rev| rev.timestamp_ms)
        } else {
            None
        };
        Ok(RevisionPage {
            updates,
            next_before_timestamp,
        })
    }

    fn filetree_diff(&self, from: u64, to: u64) -> SyncResult<Vec<FiletreeDiffEntry>> {
        let state = self.state.lock();
        state.check_window(from, to)?;
        let before = &state.snapshots[from as usize];
        let after = &state.snapshots[to as usize];
        let renames = state.renames(from, to);
        let origins: BTreeSet<&String> = renames.values().collect();

        let mut entries = Vec::new();
        for (new, origin) in &renames {
            let editable = after[new].editable;
            entries.push(
                FiletreeDiffEntry::renamed(origin.clone(), new.clone()).with_editable(editable),
            );
            if before[origin].content != after[new].content {
                entries.push(
                    FiletreeDiffEntry::new(new.clone(), FiletreeOperation::Edited)
                        .with_editable(editable),
                );
            }
        }

        let paths: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        for path in paths {
            if renames.contains_key(path) || origins.contains(path) {
                continue;
            }
            let entry = match (before.get(path), after.get(path)) {
                (None, Some(file)) => {
                    FiletreeDiffEntry::new(path.clone(), FiletreeOperation::Added)
                        .with_editable(file.editable)
                }
                (Some(file), None) => {
                    FiletreeDiffEntry::new(path.clone(), FiletreeOperation::Removed)
                        .with_editable(file.editable)
                }
                (Some(old), Some(new)) if old.content != new.content => {
                    FiletreeDiffEntry::new(path.clone(), FiletreeOperation::Edited)
                        .with_editable(new.editable)
                }
                _ => continue,
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    fn file_diff(&self, from: u64, to: u64, pathname: &str) -> SyncResult<Vec<DiffOp>> {
        let state = self.state.lock();
        state.check_window(from, to)?;
        let path = normalize_path(pathname);
        let renames = state.renames(from, to);
        let source = renames.get(&path).cloned().unwrap_or_else(|| path.clone());

        let old = state.snapshots[from as usize].get(&source);
        let new = state.snapshots[to as usize].get(&path);
        if old.or(new).map_or(false, |f| !f.editable) {
            return Err(SyncError::RemoteUnavailable(format!(
                "`{}` is not an editable doc",
                path
            )));
        }

        let mut users: Vec<Author> = Vec::new();
        let mut end_ts = 0;
        for step in state.window_steps(from, to) {
            if step.touched.contains(&path) || step.touched.contains(&source) {
                if !users.iter().any(|u| u.id == step.author.id) {
                    users.push(step.author.clone());
                }
                end_ts = end_ts.max(step.timestamp_ms);
            }
        }

        let text = |file: Option<&MockFile>| {
            file.map(|f| String::from_utf8_lossy(&f.content).into_owned())
                .unwrap_or_default()
        };
        Ok(diff_text(&text(old), &text(new), &users, end_ts))
    }

    fn download_archive(&self, version: Option<u64>) -> SyncResult<Bytes> {
        let mut state = self.state.lock();
        state.archive_requests += 1;
        let version = version.unwrap_or_else(|| state.version());
        let snapshot = state.snapshot(version)?;

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (path, file) in snapshot {
            zip.start_file(path.as_str(), SimpleFileOptions::default())?;
            zip.write_all(&file.content)?;
        }
        let cursor = zip.finish()?;
        Ok(Bytes::from(cursor.into_inner()))
    }

    fn folder_tree(&self) -> SyncResult<FolderNode> {
        let mut state = self.state.lock();
        state.tree_requests += 1;
        Ok(state.folder_node("", "rootFolder"))
    }

    fn upload(&self, folder_id: &str, file_name: &str, contents: Bytes) -> SyncResult<()> {
        let mut state = self.state.lock();
        let folder = state
            .path_of(folder_id)
            .ok_or_else(|| SyncError::RemoteUnavailable(format!("unknown folder {}", folder_id)))?;
        let path = normalize_path(&format!("{}/{}", folder, file_name));
        let editable = std::str::from_utf8(&contents).is_ok();
        let pusher = state.pusher.clone();
        state.calls.push(RemoteCall::Upload(path.clone()));
        state.step(&pusher, |snapshot, step| {
            snapshot.insert(
                path.clone(),
                MockFile {
                    content: contents.to_vec(),
                    editable,
                },
            );
            step.touched.insert(path);
        });
        state.seal();
        Ok(())
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> SyncResult<String> {
        let mut state = self.state.lock();
        let parent = state
            .path_of(parent_id)
            .ok_or_else(|| SyncError::RemoteUnavailable(format!("unknown folder {}", parent_id)))?;
        let path = normalize_path(&format!("{}/{}", parent, name));
        state.calls.push(RemoteCall::CreateFolder(path.clone()));
        state.folders.insert(path.clone());
        Ok(state.id_for(&path))
    }

    fn delete(&self, object: &RemoteObjectId) -> SyncResult<()> {
        let mut state = self.state.lock();
        let path = state
            .path_of(&object.id)
            .ok_or_else(|| SyncError::RemoteUnavailable(format!("unknown id {}", object.id)))?;
        state.calls.push(RemoteCall::Delete(path.clone()));

        let prefix = format!("{}/", path);
        let doomed: Vec<String> = match object.kind {
            RemoteObjectKind::Folder => state
                .head()
                .keys()
                .filter(|p| p.starts_with(&prefix))
                .cloned()
                .collect(),
            RemoteObjectKind::Doc | RemoteObjectKind::File => vec![path.clone()],
        };
        if object.is_folder() {
            state.folders.retain(|f| f != &path && !f.starts_with(&prefix));
        }
        if !doomed.is_empty() {
            let pusher = state.pusher.clone();
            state.step(&pusher, |snapshot, step| {
                for path in doomed {
                    snapshot.remove(&path);
                    step.touched.insert(path);
                }
            });
            state.seal();
        }
        Ok(())
    }
}
