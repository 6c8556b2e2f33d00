//! Effective folder access and the inheritance cascade.
//!
//! Resolution order for a user on a folder:
//! 1. Elevated privilege: write.
//! 2. Explicit entry on the folder's access list: that level.
//! 3. Group-gated folder (non-empty group list): write for members, none otherwise.
//! 4. Otherwise the folder is open: write.
//!
//! Access lists are never merged. A child receives its parent's list verbatim on
//! creation and on every cascade.
use std::collections::{HashSet, VecDeque};

use crate::collaborators::IdentityOracle;
use crate::error::LifecycleError;
use crate::folder::{AccessLevel, Folder};
use crate::types::{FolderId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    None,
    Read,
    Write,
}

pub fn resolve(folder: &Folder, user: &UserId, identity: &dyn IdentityOracle) -> Access {
    if identity.has_elevated_privilege(user) {
        return Access::Write;
    }
    match folder.access.level_of(user) {
        Some(AccessLevel::Write) => return Access::Write,
        Some(AccessLevel::Read) => return Access::Read,
        None => {}
    }
    if folder.access.groups.is_empty() {
        return Access::Write;
    }
    let member = folder
        .access
        .groups
        .iter()
        .any(|group| identity.group_members(group).contains(user));
    if member { Access::Write } else { Access::None }
}

pub fn check_write(
    folder: &Folder,
    user: &UserId,
    identity: &dyn IdentityOracle,
) -> Result<(), LifecycleError> {
    match resolve(folder, user, identity) {
        Access::Write => Ok(()),
        Access::Read => Err(LifecycleError::denied(
            user,
            "write",
            format!("read-only access to folder {}", folder.path),
        )),
        Access::None => Err(LifecycleError::denied(
            user,
            "write",
            format!("not in any group authorized on folder {}", folder.path),
        )),
    }
}

/// Rewrites every descendant of `root` with `root`'s access list and a path derived from it.
///
/// Walks the subtree breadth-first with an explicit queue. `children_of` returns the
/// current children of a folder. Returns the rewritten descendants; folders reached twice
/// are visited once.
pub fn cascade<E>(
    root: &Folder,
    children_of: impl FnMut(&FolderId) -> Result<Vec<Folder>, E>,
) -> Result<Vec<Folder>, E> {
    walk(root, children_of, true)
}

/// Like [`cascade`] but only recomputes paths, leaving access lists alone.
pub fn repath<E>(
    root: &Folder,
    children_of: impl FnMut(&FolderId) -> Result<Vec<Folder>, E>,
) -> Result<Vec<Folder>, E> {
    walk(root, children_of, false)
}

fn walk<E>(
    root: &Folder,
    mut children_of: impl FnMut(&FolderId) -> Result<Vec<Folder>, E>,
    copy_access: bool,
) -> Result<Vec<Folder>, E> {
    let mut queue = VecDeque::from([(root.id.clone(), root.path.clone())]);
    let mut seen = HashSet::from([root.id.clone()]);
    let mut rewritten = Vec::new();

    while let Some((parent_id, parent_path)) = queue.pop_front() {
        for mut child in children_of(&parent_id)? {
            if !seen.insert(child.id.clone()) {
                continue;
            }
            if copy_access {
                child.access = root.access.clone();
            }
            child.path = format!("{} / {}", parent_path, child.name);
            queue.push_back((child.id.clone(), child.path.clone()));
            rewritten.push(child);
        }
    }

    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticDirectory;
    use crate::folder::{AccessEntry, AccessList};
    use crate::types::GroupId;
    use std::collections::HashMap;
    use std::convert::Infallible;

    fn folder(id: &str, parent: Option<&str>, access: AccessList) -> Folder {
        Folder {
            id: FolderId::from(id),
            name: id.to_owned(),
            parent_id: parent.map(FolderId::from),
            path: id.to_owned(),
            access,
        }
    }

    #[test]
    fn open_folder_grants_write() {
        let f = folder("a", None, AccessList::default());
        let dir = StaticDirectory::new();
        assert_eq!(resolve(&f, &UserId::from("u"), &dir), Access::Write);
    }

    #[test]
    fn explicit_read_entry_blocks_writes() {
        let f = folder("a", None, AccessList::new([AccessEntry::read(UserId::from("u"))]));
        let dir = StaticDirectory::new();
        assert_eq!(resolve(&f, &UserId::from("u"), &dir), Access::Read);
        assert!(matches!(
            check_write(&f, &UserId::from("u"), &dir),
            Err(LifecycleError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn elevated_users_bypass_read_entries() {
        let f = folder("a", None, AccessList::new([AccessEntry::read(UserId::from("root"))]));
        let dir = StaticDirectory::new().with_admin(UserId::from("root"));
        assert!(check_write(&f, &UserId::from("root"), &dir).is_ok());
    }

    #[test]
    fn group_gated_folder_admits_members_only() {
        let access = AccessList::default().with_groups([GroupId::from("qa")]);
        let f = folder("a", None, access);
        let dir = StaticDirectory::new().with_member(GroupId::from("qa"), UserId::from("ana"));

        assert_eq!(resolve(&f, &UserId::from("ana"), &dir), Access::Write);
        assert_eq!(resolve(&f, &UserId::from("bob"), &dir), Access::None);
    }

    #[test]
    fn cascade_replaces_lists_and_paths_through_the_subtree() {
        let mut root = folder("root", None, AccessList::new([AccessEntry::read(UserId::from("u2"))]));
        root.path = "Quality".into();
        let mut tree: HashMap<FolderId, Vec<Folder>> = HashMap::new();
        let stale = AccessList::new([AccessEntry::write(UserId::from("u1"))]);
        tree.insert(root.id.clone(), vec![folder("b", Some("root"), stale.clone())]);
        tree.insert(FolderId::from("b"), vec![folder("c", Some("b"), stale)]);

        let out = cascade(&root, |id| {
            Ok::<_, Infallible>(tree.get(id).cloned().unwrap_or_default())
        })
        .unwrap();

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|f| f.access == root.access));
        assert_eq!(out[1].path, "Quality / b / c");
    }

    #[test]
    fn repath_keeps_child_overrides() {
        let mut root = folder("root", None, AccessList::default());
        root.path = "Records".into();
        let own = AccessList::new([AccessEntry::read(UserId::from("u1"))]);
        let child = folder("b", Some("root"), own.clone());

        let out = repath(&root, |id| {
            Ok::<_, Infallible>(if *id == root.id { vec![child.clone()] } else { vec![] })
        })
        .unwrap();

        assert_eq!(out[0].path, "Records / b");
        assert_eq!(out[0].access, own);
    }
}
