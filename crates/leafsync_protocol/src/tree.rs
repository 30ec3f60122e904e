//! Remote folder tree and the path -> object id index derived from it.

use crate::error::ProtocolResult;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Kind of remote object a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteObjectKind {
    /// Binary file reference.
    File,
    /// Editable text document.
    Doc,
    /// Folder.
    Folder,
}

impl RemoteObjectKind {
    /// URL segment used by the remote for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteObjectKind::File => "file",
            RemoteObjectKind::Doc => "doc",
            RemoteObjectKind::Folder => "folder",
        }
    }
}

impl fmt::Display for RemoteObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote object id with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteObjectId {
    /// Opaque remote id.
    pub id: String,
    /// Object kind.
    pub kind: RemoteObjectKind,
}

impl RemoteObjectId {
    /// Creates a new object id.
    pub fn new(id: impl Into<String>, kind: RemoteObjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    /// Returns true if the object is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == RemoteObjectKind::Folder
    }
}

/// A named leaf (doc or file reference) in the folder tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreeEntry {
    /// Remote id.
    #[serde(rename = "_id")]
    pub id: String,
    /// File name within its folder.
    pub name: String,
}

impl TreeEntry {
    /// Creates a new entry.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A folder in the remote project tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FolderNode {
    /// Remote id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Folder name (`rootFolder` for the root).
    #[serde(default)]
    pub name: String,
    /// Sub-folders.
    #[serde(default)]
    pub folders: Vec<FolderNode>,
    /// Editable documents.
    #[serde(default)]
    pub docs: Vec<TreeEntry>,
    /// Binary file references.
    #[serde(rename = "fileRefs", default)]
    pub file_refs: Vec<TreeEntry>,
}

impl FolderNode {
    /// Creates an empty folder.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            folders: Vec::new(),
            docs: Vec::new(),
            file_refs: Vec::new(),
        }
    }

    /// Returns true if no doc or file exists anywhere below this folder.
    pub fn is_empty_subtree(&self) -> bool {
        self.docs.is_empty()
            && self.file_refs.is_empty()
            && self.folders.iter().all(FolderNode::is_empty_subtree)
    }
}

/// Decodes the root folder from a `joinProjectResponse` event payload.
///
/// The tree lives at `args[0].project.rootFolder[0]`.
pub fn decode_root_folder(event: &serde_json::Value) -> ProtocolResult<FolderNode> {
    let root = event
        .pointer("/args/0/project/rootFolder/0")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    Ok(serde_json::from_value(root)?)
}

/// Normalizes a project path to forward slashes with no leading `./` or `/`.
pub fn normalize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns the parent folder of a normalized path (`""` for the root).
pub fn parent_path(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Path -> id projection of the remote folder tree.
#[derive(Debug, Clone)]
pub struct IdIndex {
    root_id: String,
    entries: HashMap<String, RemoteObjectId>,
}

impl IdIndex {
    /// Builds the index by walking the tree from the root folder.
    pub fn build(root: &FolderNode) -> Self {
        let mut entries = HashMap::new();
        index_folder(root, "", &mut entries);
        Self {
            root_id: root.id.clone(),
            entries,
        }
    }

    /// Id of the project root folder.
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Resolves a path; the empty path is the root folder.
    pub fn resolve(&self, path: &str) -> Option<RemoteObjectId> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Some(RemoteObjectId::new(self.root_id.clone(), RemoteObjectKind::Folder));
        }
        self.entries.get(&path).cloned()
    }

    /// Paths of all folders below the root.
    pub fn folder_paths(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, object)| object.is_folder())
            .map(|(path, _)| path.as_str())
    }

    /// Number of indexed paths (root excluded).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the project has nothing below the root.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn index_folder(folder: &FolderNode, prefix: &str, entries: &mut HashMap<String, RemoteObjectId>) {
    for sub in &folder.folders {
        let path = format!("{}{}", prefix, sub.name);
        entries.insert(
            path.clone(),
            RemoteObjectId::new(sub.id.clone(), RemoteObjectKind::Folder),
        );
        index_folder(sub, &format!("{}/", path), entries);
    }
    for doc in &folder.docs {
        entries.insert(
            format!("{}{}", prefix, doc.name),
            RemoteObjectId::new(doc.id.clone(), RemoteObjectKind::Doc),
        );
    }
    for file in &folder.file_refs {
        entries.insert(
            format!("{}{}", prefix, file.name),
            RemoteObjectId::new(file.id.clone(), RemoteObjectKind::File),
        );
    }
}

/// Paths of the outermost folders whose whole subtree holds no doc or file.
///
/// Nested empty folders under an already-reported one are not listed,
/// since deleting the outer folder removes them too.
pub fn empty_folders(root: &FolderNode) -> Vec<String> {
    fn walk(folder: &FolderNode, prefix: &str, found: &mut Vec<String>) {
        for sub in &folder.folders {
            let path = format!("{}{}", prefix, sub.name);
            if sub.is_empty_subtree() {
                found.push(path);
            } else {
                walk(sub, &format!("{}/", path), found);
            }
        }
    }

    let mut found = Vec::new();
    walk(root, "", &mut found);
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> FolderNode {
        let mut figures = FolderNode::new("f-figures", "figures");
        figures.file_refs.push(TreeEntry::new("r-plot", "plot.png"));
        let mut raw = FolderNode::new("f-raw", "raw");
        raw.folders.push(FolderNode::new("f-raw-old", "old"));
        figures.folders.push(raw);

        let mut root = FolderNode::new("f-root", "rootFolder");
        root.docs.push(TreeEntry::new("d-main", "main.tex"));
        root.folders.push(figures);
        root.folders.push(FolderNode::new("f-empty", "empty"));
        root
    }

    #[test]
    fn index_resolves_nested_paths() {
        let index = IdIndex::build(&sample_tree());

        assert_eq!(index.root_id(), "f-root");
        assert_eq!(
            index.resolve("main.tex"),
            Some(RemoteObjectId::new("d-main", RemoteObjectKind::Doc))
        );
        assert_eq!(
            index.resolve("figures/plot.png"),
            Some(RemoteObjectId::new("r-plot", RemoteObjectKind::File))
        );
        assert_eq!(
            index.resolve("./figures/raw/old/"),
            Some(RemoteObjectId::new("f-raw-old", RemoteObjectKind::Folder))
        );
        assert_eq!(index.resolve("missing.tex"), None);
        assert!(index.resolve("").unwrap().is_folder());
        assert_eq!(index.len(), 6);
    }

    #[test]
    fn folder_paths_lists_only_folders() {
        let index = IdIndex::build(&sample_tree());
        let mut folders: Vec<_> = index.folder_paths().collect();
        folders.sort_unstable();
        assert_eq!(folders, vec!["empty", "figures", "figures/raw", "figures/raw/old"]);
    }

    #[test]
    fn empty_folders_reports_outermost_only() {
        let mut found = empty_folders(&sample_tree());
        found.sort();
        assert_eq!(found, vec!["empty", "figures/raw"]);
    }

    #[test]
    fn normalize_and_parent() {
        assert_eq!(normalize_path("./a//b\\c.tex"), "a/b/c.tex");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(parent_path("a/b/c.tex"), "a/b");
        assert_eq!(parent_path("c.tex"), "");
    }

    #[test]
    fn decode_join_project_event() {
        let event: serde_json::Value = serde_json::from_str(
            r#"{"name": "joinProjectResponse", "args": [{"project": {"rootFolder": [
                {"_id": "root", "name": "rootFolder",
                 "folders": [{"_id": "s1", "name": "sections", "folders": [], "docs": [{"_id": "d2", "name": "intro.tex"}], "fileRefs": []}],
                 "docs": [{"_id": "d1", "name": "main.tex"}],
                 "fileRefs": [{"_id": "r1", "name": "logo.pdf"}]}
            ]}}]}"#,
        )
        .unwrap();

        let root = decode_root_folder(&event).unwrap();
        let index = IdIndex::build(&root);
        assert_eq!(index.resolve("sections/intro.tex").unwrap().id, "d2");
        assert_eq!(index.resolve("logo.pdf").unwrap().kind, RemoteObjectKind::File);
    }

    #[test]
    fn decode_event_without_tree_fails() {
        let event: serde_json::Value =
            serde_json::from_str(r#"{"name": "joinProjectResponse", "args": []}"#).unwrap();
        assert!(decode_root_folder(&event).is_err());
    }
}
