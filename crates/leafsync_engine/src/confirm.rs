//! Confirmation policy for irreversible remote folder deletes.

/// Decides whether a remote folder (and its whole subtree) may be deleted.
pub trait ConfirmDelete {
    /// Returns true to proceed with deleting `path`.
    fn confirm_folder_delete(&self, path: &str) -> bool;
}

/// Allows every folder delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAllow;

impl ConfirmDelete for AlwaysAllow {
    fn confirm_folder_delete(&self, _path: &str) -> bool {
        true
    }
}

/// Refuses every folder delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDeny;

impl ConfirmDelete for AlwaysDeny {
    fn confirm_folder_delete(&self, _path: &str) -> bool {
        false
    }
}

impl<F> ConfirmDelete for F
where
    F: Fn(&str) -> bool,
{
    fn confirm_folder_delete(&self, path: &str) -> bool {
        self(path)
    }
}
