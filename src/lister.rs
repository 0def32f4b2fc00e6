use tracing::debug;

use crate::error::AppResult;
use crate::model::{FileNode, NodeKind};
use crate::remote::RemoteTree;

/// Every plain file below `root_id`, depth first. Folders are descended but not returned;
/// shortcuts are neither. Within a folder its own files come first, then each subfolder's
/// files in listing order.
pub async fn list_files(remote: &dyn RemoteTree, root_id: &str) -> AppResult<Vec<FileNode>> {
    let mut out = Vec::new();
    let mut pending: Vec<String> = vec![root_id.to_string()];
    let mut folders_seen = 0usize;

    while let Some(folder_id) = pending.pop() {
        folders_seen += 1;
        let children = remote
            .list_children(&folder_id, None, false)
            .await
            .map_err(|e| e.context(format!("list {}", folder_id)))?;
        let mut subfolders = Vec::new();
        for child in children {
            match child.kind() {
                NodeKind::File => out.push(child),
                NodeKind::Folder => subfolders.push(child.id),
                NodeKind::Shortcut => {}
            }
        }
        // Reversed so the first-listed subfolder is visited next.
        pending.extend(subfolders.into_iter().rev());
    }

    debug!(target: "drivesync::lister", "listed {} files across {} folders under {}", out.len(), folders_seen, root_id);
    Ok(out)
}
