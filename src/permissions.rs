//! Permission scopes for the authorization flow
//!
//! Scopes are rendered on the wire as `read:account` / `write:notes` style
//! strings, joined with commas in the confirmation URI.

use std::fmt;

/// Resource kinds a permission can apply to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    Account,
    Blocks,
    Drive,
    Favorites,
    Following,
    Messaging,
    Mutes,
    Notes,
    Notifications,
    Pages,
    Reactions,
    Votes,
}

impl PermissionKind {
    /// All resource kinds, in wire order
    pub const ALL: [PermissionKind; 12] = [
        PermissionKind::Account,
        PermissionKind::Blocks,
        PermissionKind::Drive,
        PermissionKind::Favorites,
        PermissionKind::Following,
        PermissionKind::Messaging,
        PermissionKind::Mutes,
        PermissionKind::Notes,
        PermissionKind::Notifications,
        PermissionKind::Pages,
        PermissionKind::Reactions,
        PermissionKind::Votes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::Account => "account",
            PermissionKind::Blocks => "blocks",
            PermissionKind::Drive => "drive",
            PermissionKind::Favorites => "favorites",
            PermissionKind::Following => "following",
            PermissionKind::Messaging => "messaging",
            PermissionKind::Mutes => "mutes",
            PermissionKind::Notes => "notes",
            PermissionKind::Notifications => "notifications",
            PermissionKind::Pages => "pages",
            PermissionKind::Reactions => "reactions",
            PermissionKind::Votes => "votes",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single permission: access direction crossed with a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read(PermissionKind),
    Write(PermissionKind),
}

impl Permission {
    /// The wire scope string, e.g. `read:account`
    pub fn scope(&self) -> String {
        match self {
            Permission::Read(kind) => format!("read:{kind}"),
            Permission::Write(kind) => format!("write:{kind}"),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scope())
    }
}

/// A collection of permissions for subset checking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    permissions: Vec<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self {
            permissions: Vec::new(),
        }
    }

    /// Every read and write permission over every resource kind
    pub fn all() -> Self {
        PermissionKind::ALL
            .iter()
            .flat_map(|&kind| [Permission::Read(kind), Permission::Write(kind)])
            .collect()
    }

    /// Add a permission to the set
    pub fn add(&mut self, permission: Permission) {
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
    }

    /// Check whether the set contains the given permission
    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn can_read(&self, kind: PermissionKind) -> bool {
        self.allows(Permission::Read(kind))
    }

    pub fn can_write(&self, kind: PermissionKind) -> bool {
        self.allows(Permission::Write(kind))
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Wire scope strings, in insertion order
    pub fn scopes(&self) -> Vec<String> {
        self.permissions.iter().map(Permission::scope).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        let mut set = PermissionSet::new();
        for permission in iter {
            set.add(permission);
        }
        set
    }
}
