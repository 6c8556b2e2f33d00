use std::collections::HashSet;
use std::sync::MutexGuard;

use tracing::{debug, info};

use super::DocumentService;
use crate::access::{self, Access};
use crate::code;
use crate::document::Document;
use crate::error::{LifecycleError, ValidationError};
use crate::folder::{AccessList, Folder, NewFolder};
use crate::store::{self, TxResult};
use crate::types::{FolderId, UserId};

impl DocumentService {
    pub fn folder(&self, id: &FolderId) -> Result<Folder, LifecycleError> {
        store::load(&self.instance, &store::folder_key(id))?
            .ok_or_else(|| LifecycleError::FolderNotFound(id.clone()))
    }

    /// Direct children of a folder, ordered by path.
    pub fn children(&self, id: &FolderId) -> Result<Vec<Folder>, LifecycleError> {
        let mut children = store::scan_keys(&self.instance, &store::child_prefix(id))?
            .into_iter()
            .map(|child| self.folder(&FolderId::from(child)))
            .collect::<Result<Vec<_>, _>>()?;
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    pub fn roots(&self) -> Result<Vec<Folder>, LifecycleError> {
        let mut roots: Vec<Folder> = store::scan(&self.instance, store::FOLDERS)?;
        roots.retain(|f| f.parent_id.is_none());
        roots.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(roots)
    }

    pub fn resolve_access(&self, id: &FolderId, user: &UserId) -> Result<Access, LifecycleError> {
        Ok(access::resolve(&self.folder(id)?, user, self.identity()))
    }

    /// Create a folder. Under a parent it starts with the parent's access list unless
    /// `new.access` is given.
    pub fn create_folder(&self, actor: &UserId, new: NewFolder) -> Result<Folder, LifecycleError> {
        let name = new.name.trim().to_owned();
        if name.is_empty() {
            return Err(ValidationError::Empty("folder name").into());
        }
        let _tree = self.lock_tree();

        let folder = match &new.parent_id {
            Some(parent_id) => {
                let parent = self.folder(parent_id)?;
                access::check_write(&parent, actor, self.identity())?;
                Folder {
                    id: FolderId::generate()?,
                    path: parent.child_path(&name),
                    name,
                    parent_id: Some(parent.id.clone()),
                    access: new.access.unwrap_or_else(|| parent.access.clone()),
                }
            }
            None => Folder {
                id: FolderId::generate()?,
                path: name.clone(),
                name,
                parent_id: None,
                access: new.access.unwrap_or_default(),
            },
        };

        self.instance.transaction(|tx| -> TxResult<()> {
            if let Some(parent_id) = &folder.parent_id {
                store::folder(tx, parent_id)?;
                tx.insert(store::child_key(parent_id, &folder.id).as_bytes(), Vec::new())?;
            }
            store::put(tx, &store::folder_key(&folder.id), &folder)
        })?;

        info!(folder = %folder.id, path = %folder.path, "folder created");
        Ok(folder)
    }

    /// Replace a folder's access list and push it down to every descendant.
    pub fn set_folder_access(
        &self,
        actor: &UserId,
        id: &FolderId,
        access_list: AccessList,
    ) -> Result<Folder, LifecycleError> {
        let _tree = self.lock_tree();
        let mut folder = self.folder(id)?;
        access::check_write(&folder, actor, self.identity())?;

        folder.access = access_list;
        let descendants = access::cascade(&folder, |parent| self.children(parent))?;
        self.write_folders(&folder, &descendants, None)?;

        debug!(folder = %folder.id, touched = descendants.len() + 1, "folder access cascaded");
        Ok(folder)
    }

    /// Move a folder below `new_parent`, or to the top level with `None`.
    ///
    /// Under a parent the folder takes the parent's access list, which then cascades.
    pub fn move_folder(
        &self,
        actor: &UserId,
        id: &FolderId,
        new_parent: Option<&FolderId>,
    ) -> Result<Folder, LifecycleError> {
        let _tree = self.lock_tree();
        let mut folder = self.folder(id)?;
        access::check_write(&folder, actor, self.identity())?;
        let old_parent = folder.parent_id.clone();

        match new_parent {
            Some(parent_id) => {
                let parent = self.folder(parent_id)?;
                access::check_write(&parent, actor, self.identity())?;
                self.ensure_not_below(&folder.id, &parent)?;
                folder.path = parent.child_path(&folder.name);
                folder.access = parent.access.clone();
                folder.parent_id = Some(parent.id);
            }
            None => {
                folder.path = folder.name.clone();
                folder.parent_id = None;
            }
        }

        let descendants = access::cascade(&folder, |parent| self.children(parent))?;
        self.write_folders(&folder, &descendants, Some(old_parent))?;

        info!(folder = %folder.id, path = %folder.path, "folder moved");
        debug!(folder = %folder.id, touched = descendants.len() + 1, "folder access cascaded");
        Ok(folder)
    }

    pub fn rename_folder(
        &self,
        actor: &UserId,
        id: &FolderId,
        name: &str,
    ) -> Result<Folder, LifecycleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::Empty("folder name").into());
        }
        let _tree = self.lock_tree();
        let mut folder = self.folder(id)?;
        access::check_write(&folder, actor, self.identity())?;

        folder.path = match &folder.parent_id {
            Some(parent_id) => self.folder(parent_id)?.child_path(name),
            None => name.to_owned(),
        };
        folder.name = name.to_owned();
        let descendants = access::repath(&folder, |parent| self.children(parent))?;
        self.write_folders(&folder, &descendants, None)?;

        info!(folder = %folder.id, path = %folder.path, "folder renamed");
        Ok(folder)
    }

    /// Delete a folder and its subfolders. Fails while any of them holds a document.
    pub fn delete_folder(&self, actor: &UserId, id: &FolderId) -> Result<(), LifecycleError> {
        let _tree = self.lock_tree();
        let folder = self.folder(id)?;
        access::check_write(&folder, actor, self.identity())?;

        let descendants = access::repath(&folder, |parent| self.children(parent))?;
        let subtree: HashSet<&FolderId> = std::iter::once(&folder.id)
            .chain(descendants.iter().map(|f| &f.id))
            .collect();
        let documents: Vec<Document> = store::scan(&self.instance, store::DOCUMENTS)?;
        if let Some(doc) = documents.iter().find(|d| subtree.contains(&d.folder_id)) {
            return Err(ValidationError::FolderInUse(doc.folder_id.clone()).into());
        }

        self.instance.transaction(|tx| -> TxResult<()> {
            for f in std::iter::once(&folder).chain(&descendants) {
                if let Some(parent_id) = &f.parent_id {
                    tx.remove(store::child_key(parent_id, &f.id).as_bytes())?;
                }
                tx.remove(store::folder_key(&f.id).as_bytes())?;
            }
            Ok(())
        })?;

        info!(folder = %folder.id, removed = subtree.len(), "folder deleted");
        Ok(())
    }

    pub(super) fn lock_tree(&self) -> MutexGuard<'_, ()> {
        code::acquire(&self.tree_lock)
    }

    /// Fails if `target` is `folder` itself or one of its descendants.
    fn ensure_not_below(&self, folder: &FolderId, target: &Folder) -> Result<(), LifecycleError> {
        let mut seen = HashSet::new();
        let mut cursor = Some(target.clone());
        while let Some(current) = cursor {
            if current.id == *folder {
                return Err(ValidationError::FolderCycle {
                    folder: folder.clone(),
                    target: target.id.clone(),
                }
                .into());
            }
            if !seen.insert(current.id.clone()) {
                break;
            }
            cursor = match &current.parent_id {
                Some(parent_id) => Some(self.folder(parent_id)?),
                None => None,
            };
        }
        Ok(())
    }

    /// Writes `root` and its rewritten descendants in one transaction. With `reparent`,
    /// the root's child link moves from the old parent to the current one.
    fn write_folders(
        &self,
        root: &Folder,
        descendants: &[Folder],
        reparent: Option<Option<FolderId>>,
    ) -> Result<(), LifecycleError> {
        self.instance.transaction(|tx| -> TxResult<()> {
            if let Some(old_parent) = &reparent {
                if let Some(old) = old_parent {
                    tx.remove(store::child_key(old, &root.id).as_bytes())?;
                }
                if let Some(parent_id) = &root.parent_id {
                    store::folder(tx, parent_id)?;
                    tx.insert(store::child_key(parent_id, &root.id).as_bytes(), Vec::new())?;
                }
            }
            if tx.get(store::folder_key(&root.id).as_bytes())?.is_none() {
                return store::fail(LifecycleError::FolderNotFound(root.id.clone()));
            }
            store::put(tx, &store::folder_key(&root.id), root)?;
            for folder in descendants {
                store::put(tx, &store::folder_key(&folder.id), folder)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}
