//! In-memory node tree with the service's mutation rules.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use bytes::Bytes;

use crate::constants::ANY_VERSION;
use crate::constants::ROOT_PATH;
use crate::constants::SEQUENTIAL_SUFFIX_WIDTH;
use crate::transport::ServiceResult;
use crate::Acl;
use crate::CreateMode;
use crate::EventType;
use crate::ServiceFault;
use crate::Stat;

#[derive(Debug, Clone)]
pub(crate) struct DataNode {
    pub(crate) data: Option<Bytes>,
    pub(crate) acl: Vec<Acl>,
    pub(crate) stat: Stat,
    pub(crate) children: BTreeSet<String>,
}

/// Which watch table a trigger targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchKind {
    Data,
    Child,
}

/// Watch notification produced by a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Trigger {
    pub(crate) path: String,
    pub(crate) event_type: EventType,
    pub(crate) kind: WatchKind,
}

impl Trigger {
    pub(crate) fn new(
        path: &str,
        event_type: EventType,
        kind: WatchKind,
    ) -> Self {
        Self {
            path: path.to_string(),
            event_type,
            kind,
        }
    }
}

#[derive(Debug)]
pub(crate) struct DataTree {
    nodes: HashMap<String, DataNode>,
    /// Paths of ephemeral nodes by owning session
    ephemerals: HashMap<u64, BTreeSet<String>>,
    last_zxid: i64,
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree {
    pub(crate) fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_PATH.to_string(),
            DataNode {
                data: None,
                acl: Acl::open_unsafe(),
                stat: Stat::default(),
                children: BTreeSet::new(),
            },
        );
        Self {
            nodes,
            ephemerals: HashMap::new(),
            last_zxid: 0,
        }
    }

    pub(crate) fn node(
        &self,
        path: &str,
    ) -> Option<&DataNode> {
        self.nodes.get(path)
    }

    #[cfg(test)]
    pub(crate) fn node_mut(
        &mut self,
        path: &str,
    ) -> Option<&mut DataNode> {
        self.nodes.get_mut(path)
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn ephemerals_of(
        &self,
        session_id: u64,
    ) -> Vec<String> {
        self.ephemerals
            .get(&session_id)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn stat(
        &self,
        path: &str,
    ) -> ServiceResult<Option<Stat>> {
        validate_path(path)?;
        Ok(self.nodes.get(path).map(|n| n.stat))
    }

    pub(crate) fn children(
        &self,
        path: &str,
    ) -> ServiceResult<Vec<String>> {
        validate_path(path)?;
        self.nodes
            .get(path)
            .map(|n| n.children.iter().cloned().collect())
            .ok_or(ServiceFault::NoNode)
    }

    /// Creates a node and returns its actual path plus the watches to fire
    pub(crate) fn create(
        &mut self,
        session_id: u64,
        path: &str,
        data: Option<Bytes>,
        acl: Vec<Acl>,
        mode: CreateMode,
    ) -> ServiceResult<(String, Vec<Trigger>)> {
        if mode.is_sequential() {
            // The suffix completes the last segment, so "/parent/" is a valid prefix.
            validate_path(&format!("{path}0"))?;
        } else {
            validate_path(path)?;
        }
        if acl.is_empty() {
            return Err(ServiceFault::InvalidAcl);
        }
        if path == ROOT_PATH {
            return Err(ServiceFault::NodeExists);
        }

        let parent_path = parent_of(path).ok_or(ServiceFault::BadArguments)?;
        let parent = self.nodes.get(parent_path).ok_or(ServiceFault::NoNode)?;
        if parent.stat.ephemeral_owner != 0 {
            return Err(ServiceFault::NoChildrenForEphemerals);
        }

        let actual_path = if mode.is_sequential() {
            format!(
                "{path}{:0width$}",
                parent.stat.cversion,
                width = SEQUENTIAL_SUFFIX_WIDTH
            )
        } else {
            path.to_string()
        };
        validate_path(&actual_path)?;
        if actual_path == ROOT_PATH || self.nodes.contains_key(&actual_path) {
            return Err(ServiceFault::NodeExists);
        }

        let zxid = self.next_zxid();
        let now = now_millis();
        let ephemeral_owner = if mode.is_ephemeral() { session_id } else { 0 };
        let stat = Stat {
            czxid: zxid,
            mzxid: zxid,
            pzxid: zxid,
            ctime: now,
            mtime: now,
            version: 0,
            cversion: 0,
            aversion: 0,
            ephemeral_owner,
            data_length: data.as_ref().map(|d| d.len() as i32).unwrap_or(0),
            num_children: 0,
        };

        let child_name = child_name_of(&actual_path).to_string();
        let parent_path = parent_path.to_string();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.insert(child_name);
            parent.stat.cversion = parent.stat.cversion.wrapping_add(1);
            parent.stat.num_children = parent.children.len() as i32;
            parent.stat.pzxid = zxid;
        }

        self.nodes.insert(
            actual_path.clone(),
            DataNode {
                data,
                acl,
                stat,
                children: BTreeSet::new(),
            },
        );
        if ephemeral_owner != 0 {
            self.ephemerals.entry(session_id).or_default().insert(actual_path.clone());
        }

        let triggers = vec![
            Trigger::new(&actual_path, EventType::NodeCreated, WatchKind::Data),
            Trigger::new(&parent_path, EventType::NodeChildrenChanged, WatchKind::Child),
        ];
        Ok((actual_path, triggers))
    }

    pub(crate) fn delete(
        &mut self,
        path: &str,
        version: i32,
    ) -> ServiceResult<Vec<Trigger>> {
        validate_path(path)?;
        if path == ROOT_PATH {
            return Err(ServiceFault::BadArguments);
        }

        let node = self.nodes.get(path).ok_or(ServiceFault::NoNode)?;
        if version != ANY_VERSION && version != node.stat.version {
            return Err(ServiceFault::BadVersion);
        }
        if !node.children.is_empty() {
            return Err(ServiceFault::NotEmpty);
        }

        let zxid = self.next_zxid();
        let removed = self.nodes.remove(path).ok_or(ServiceFault::NoNode)?;
        let owner = removed.stat.ephemeral_owner;
        if owner != 0 {
            if let Some(paths) = self.ephemerals.get_mut(&owner) {
                paths.remove(path);
                if paths.is_empty() {
                    self.ephemerals.remove(&owner);
                }
            }
        }

        let parent_path = parent_of(path).unwrap_or(ROOT_PATH).to_string();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.remove(child_name_of(path));
            parent.stat.cversion = parent.stat.cversion.wrapping_add(1);
            parent.stat.num_children = parent.children.len() as i32;
            parent.stat.pzxid = zxid;
        }

        Ok(vec![
            Trigger::new(path, EventType::NodeDeleted, WatchKind::Data),
            Trigger::new(path, EventType::NodeDeleted, WatchKind::Child),
            Trigger::new(&parent_path, EventType::NodeChildrenChanged, WatchKind::Child),
        ])
    }

    /// Drops every ephemeral node owned by `session_id`
    pub(crate) fn remove_ephemerals(
        &mut self,
        session_id: u64,
    ) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        // Deepest first so no parent is removed before its children.
        let mut paths = self.ephemerals_of(session_id);
        paths.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));

        for path in paths {
            if let Ok(mut fired) = self.delete(&path, ANY_VERSION) {
                triggers.append(&mut fired);
            }
        }
        self.ephemerals.remove(&session_id);
        triggers
    }

    fn next_zxid(&mut self) -> i64 {
        self.last_zxid = self.last_zxid.wrapping_add(1);
        self.last_zxid
    }
}

/// Rejects empty segments, relative segments, trailing slashes and NUL bytes
pub(crate) fn validate_path(path: &str) -> ServiceResult<()> {
    if !path.starts_with('/') || path.contains('\0') {
        return Err(ServiceFault::BadArguments);
    }
    if path == ROOT_PATH {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(ServiceFault::BadArguments);
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(ServiceFault::BadArguments);
        }
    }
    Ok(())
}

/// Parent of a (possibly sequential-prefix) path. `None` for the root or a relative path.
pub(crate) fn parent_of(path: &str) -> Option<&str> {
    if !path.starts_with('/') || path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn child_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
