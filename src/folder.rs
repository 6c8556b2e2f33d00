//! Folder hierarchy records
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{FolderId, GroupId, UserId};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    #[n(0)]
    Read,
    #[n(1)]
    Write,
}

/// One `(user, level)` pair of a folder's access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub user_id: UserId,
    pub level: AccessLevel,
}

impl AccessEntry {
    pub fn read(user_id: UserId) -> Self {
        Self {
            user_id,
            level: AccessLevel::Read,
        }
    }
    pub fn write(user_id: UserId) -> Self {
        Self {
            user_id,
            level: AccessLevel::Write,
        }
    }
}

/// A folder's whole access configuration. Always replaced as a unit.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    #[n(0)]
    pub users: BTreeMap<UserId, AccessLevel>,
    #[n(1)]
    pub groups: BTreeSet<GroupId>,
}

impl AccessList {
    pub fn new(entries: impl IntoIterator<Item = AccessEntry>) -> Self {
        Self {
            users: entries
                .into_iter()
                .map(|entry| (entry.user_id, entry.level))
                .collect(),
            groups: BTreeSet::new(),
        }
    }
    pub fn with_groups(mut self, groups: impl IntoIterator<Item = GroupId>) -> Self {
        self.groups = groups.into_iter().collect();
        self
    }
    pub fn entries(&self) -> Vec<AccessEntry> {
        self.users
            .iter()
            .map(|(user_id, level)| AccessEntry {
                user_id: user_id.clone(),
                level: *level,
            })
            .collect()
    }
    pub fn level_of(&self, user: &UserId) -> Option<AccessLevel> {
        self.users.get(user).copied()
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    #[n(0)]
    pub id: FolderId,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub parent_id: Option<FolderId>,
    #[n(3)]
    pub path: String, // "{parent path} / {name}"
    #[n(4)]
    pub access: AccessList,
}

impl Folder {
    pub fn child_path(&self, name: &str) -> String {
        format!("{} / {}", self.path, name)
    }
}

/// Input for creating a folder. Without an explicit access list the parent's is inherited.
#[derive(Debug, Clone, Default)]
pub struct NewFolder {
    pub name: String,
    pub parent_id: Option<FolderId>,
    pub access: Option<AccessList>,
}

impl NewFolder {
    pub fn root(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }
    pub fn under(name: &str, parent_id: FolderId) -> Self {
        Self {
            name: name.to_owned(),
            parent_id: Some(parent_id),
            access: None,
        }
    }
    pub fn set_access(mut self, access: AccessList) -> Self {
        self.access = Some(access);
        self
    }
}
