//! Create-or-reuse operations. The remote store has no upsert, so each step pairs an
//! exact-name existence query under the parent with a conditional create.
//! When several live items match, the first listed one wins.

use tracing::{debug, info};

use crate::error::AppResult;
use crate::model::{FileNode, FolderNode};
use crate::remote::RemoteTree;

/// Outcome of a resolve step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub node: FileNode,
    pub created: bool,
}

async fn first_match(
    remote: &dyn RemoteTree,
    name: &str,
    parent_id: &str,
    accept: fn(&FileNode) -> bool,
) -> AppResult<Option<FileNode>> {
    let found: Vec<FileNode> = remote
        .list_children(parent_id, Some(name), false)
        .await
        .map_err(|e| e.context(format!("lookup '{}' in {}", name, parent_id)))?
        .into_iter()
        .filter(|n| n.name == name && !n.trashed && accept(n))
        .collect();
    if found.len() > 1 {
        debug!(target: "drivesync::resolver", "{} items named '{}' in {}; using {}", found.len(), name, parent_id, found[0].id);
    }
    Ok(found.into_iter().next())
}

/// Folder `name` under `parent_id`, created when absent.
pub async fn resolve_folder(remote: &dyn RemoteTree, name: &str, parent_id: &str) -> AppResult<Resolution> {
    if let Some(node) = first_match(remote, name, parent_id, FileNode::is_folder).await? {
        info!(target: "drivesync::resolver", "Folder already exists '{}' ({})", name, node.id);
        return Ok(Resolution { node, created: false });
    }
    info!(target: "drivesync::resolver", "Creating folder '{}' in {}", name, parent_id);
    let node: FolderNode = remote
        .create_folder(name, parent_id)
        .await
        .map_err(|e| e.context(format!("create folder '{}' in {}", name, parent_id)))?;
    Ok(Resolution { node, created: true })
}

/// File `name` under `parent_id`, copied from `source` when absent.
pub async fn resolve_file(remote: &dyn RemoteTree, source: &FileNode, name: &str, parent_id: &str) -> AppResult<Resolution> {
    if let Some(node) = first_match(remote, name, parent_id, |n| !n.is_folder()).await? {
        info!(target: "drivesync::resolver", "File already exists '{}' ({})", name, node.id);
        return Ok(Resolution { node, created: false });
    }
    info!(target: "drivesync::resolver", "Copying '{}' as '{}' into {}", source.name, name, parent_id);
    let node = remote
        .copy_file(&source.id, name, parent_id)
        .await
        .map_err(|e| e.context(format!("copy '{}' as '{}' into {}", source.id, name, parent_id)))?;
    Ok(Resolution { node, created: true })
}

/// Shortcut to `target` under `parent_id`. Any non-folder item already carrying the
/// target's name counts as present.
pub async fn resolve_shortcut(remote: &dyn RemoteTree, target: &FileNode, parent_id: &str) -> AppResult<Resolution> {
    if let Some(node) = first_match(remote, &target.name, parent_id, |n| !n.is_folder()).await? {
        info!(target: "drivesync::resolver", "Shortcut already exists for '{}'", target.name);
        return Ok(Resolution { node, created: false });
    }
    info!(target: "drivesync::resolver", "Creating shortcut '{}' in {}", target.name, parent_id);
    let node = remote
        .create_shortcut(&target.id, &target.name, parent_id)
        .await
        .map_err(|e| e.context(format!("shortcut to '{}' in {}", target.id, parent_id)))?;
    Ok(Resolution { node, created: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MIME_SPREADSHEET;
    use crate::remote::{MemoryRemote, Mutation};

    #[tokio::test]
    async fn folder_created_once() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        let first = resolve_folder(&m, "North", &root).await.unwrap();
        assert!(first.created);
        let second = resolve_folder(&m, "North", &root).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.node.id, second.node.id);
        assert_eq!(m.mutation_count(), 1);
    }

    #[tokio::test]
    async fn trashed_folder_is_not_reused() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        let old = m.add_folder("North", &root);
        m.trash(&old);
        let r = resolve_folder(&m, "North", &root).await.unwrap();
        assert!(r.created);
        assert_ne!(r.node.id, old);
    }

    #[tokio::test]
    async fn file_with_folder_name_is_not_a_folder_match() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        m.add_file("North", "application/pdf", &root);
        let r = resolve_folder(&m, "North", &root).await.unwrap();
        assert!(r.created);
        assert!(r.node.is_folder());
    }

    #[tokio::test]
    async fn first_match_wins_on_duplicates() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        let a = m.add_folder("Dup", &root);
        m.add_folder("Dup", &root);
        let r = resolve_folder(&m, "Dup", &root).await.unwrap();
        assert_eq!(r.node.id, a);
        assert!(!r.created);
    }

    #[tokio::test]
    async fn file_copied_then_reused() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        let lib = m.add_folder("Library", &root);
        let tpl = m.add_file("Accounts", MIME_SPREADSHEET, &lib);
        let tpl = m.node(&tpl).unwrap();
        let dest = m.add_folder("North", &root);

        let r1 = resolve_file(&m, &tpl, "North Accounts 2024", &dest).await.unwrap();
        let r2 = resolve_file(&m, &tpl, "North Accounts 2024", &dest).await.unwrap();
        assert!(r1.created && !r2.created);
        assert_eq!(r1.node.id, r2.node.id);
        assert_eq!(
            m.journal(),
            vec![Mutation::CopyFile { source: tpl.id.clone(), name: "North Accounts 2024".into(), parent: dest.clone() }]
        );
    }

    #[tokio::test]
    async fn shortcut_matches_by_target_name() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        let handbook = m.add_file("Handbook", "application/pdf", &root);
        let handbook = m.node(&handbook).unwrap();
        let dest = m.add_folder("North", &root);

        let r1 = resolve_shortcut(&m, &handbook, &dest).await.unwrap();
        assert!(r1.created);
        assert_eq!(r1.node.name, "Handbook");
        assert_eq!(r1.node.shortcut_target.as_deref(), Some(handbook.id.as_str()));
        assert!(!resolve_shortcut(&m, &handbook, &dest).await.unwrap().created);
    }

    #[tokio::test]
    async fn remote_failure_carries_context() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        m.fail_next("create_folder");
        let err = resolve_folder(&m, "North", &root).await.unwrap_err();
        assert!(err.is_remote());
        assert!(err.message().contains("create folder 'North'"));
    }
}
