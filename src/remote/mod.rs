//! Remote tree capability: the storage operations the reconcilers need, behind one trait.
//!
//! Backends:
//! - `memory`: in-process tree used by tests and local experiments.
//! - `drive`: Google Drive v3 / Sheets v4 / Forms v1 over HTTP.
//!
//! Calls are awaited one at a time by the reconcilers; a backend never sees overlapping
//! requests from a single run.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::model::{FileNode, FolderNode, PermissionGrant};

pub mod drive;
pub mod memory;

pub use drive::{DriveError, DriveRemote};
pub use memory::{MemoryRemote, Mutation};

#[async_trait]
pub trait RemoteTree: Send + Sync {
    /// Children of `parent_id`, in backend listing order. `name` filters by exact name.
    async fn list_children(&self, parent_id: &str, name: Option<&str>, include_trashed: bool) -> AppResult<Vec<FileNode>>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> AppResult<FolderNode>;

    async fn copy_file(&self, source_id: &str, new_name: &str, parent_id: &str) -> AppResult<FileNode>;

    async fn create_shortcut(&self, target_id: &str, name: &str, parent_id: &str) -> AppResult<FileNode>;

    async fn get_file(&self, file_id: &str) -> AppResult<FileNode>;

    async fn list_permissions(&self, file_id: &str) -> AppResult<Vec<PermissionGrant>>;

    async fn create_permission(&self, file_id: &str, email: &str, role: &str) -> AppResult<PermissionGrant>;

    /// Overwrite role and expiration of an existing grant; the principal is kept.
    async fn update_permission(&self, file_id: &str, grant_id: &str, role: &str, expiration_time: &str) -> AppResult<PermissionGrant>;

    /// Spreadsheet currently receiving the form's responses.
    async fn form_destination(&self, form_id: &str) -> AppResult<Option<String>>;

    async fn set_form_destination(&self, form_id: &str, spreadsheet_id: &str) -> AppResult<()>;

    /// Move the response sheet created for `form_id` to position `index` within the spreadsheet.
    async fn move_response_sheet(&self, spreadsheet_id: &str, form_id: &str, index: usize) -> AppResult<()>;

    /// Cell of the first sheet; `row` and `col` are 1-based.
    async fn read_cell(&self, spreadsheet_id: &str, row: u32, col: u32) -> AppResult<Option<String>>;

    async fn write_cell(&self, spreadsheet_id: &str, row: u32, col: u32, value: &str) -> AppResult<()>;
}
