use serde::Deserialize;
use serde::Serialize;

use crate::Acl;
use crate::Result;

/// Predefined access policies
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AclPolicy {
    /// Anyone may do anything
    #[default]
    OpenUnsafe,
    /// Only the creating identity may do anything
    CreatorAll,
    /// Anyone may read, nobody may write
    ReadUnsafe,
}

impl AclPolicy {
    pub fn to_acl(&self) -> Vec<Acl> {
        match self {
            AclPolicy::OpenUnsafe => Acl::open_unsafe(),
            AclPolicy::CreatorAll => Acl::creator_all(),
            AclPolicy::ReadUnsafe => Acl::read_unsafe(),
        }
    }
}

/// ACL attached to nodes created without an explicit ACL
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AclConfig {
    /// Default: `open_unsafe`
    #[serde(default)]
    pub policy: AclPolicy,
}

impl AclConfig {
    pub fn acl(&self) -> Vec<Acl> {
        self.policy.to_acl()
    }

    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}
