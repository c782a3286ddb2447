use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

/// Node metadata as reported by the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Transaction id that created the node
    pub czxid: i64,
    /// Transaction id of the last data change
    pub mzxid: i64,
    /// Transaction id of the last child list change
    pub pzxid: i64,
    /// Creation time, milliseconds since epoch
    pub ctime: i64,
    /// Last modification time, milliseconds since epoch
    pub mtime: i64,
    /// Number of data changes
    pub version: i32,
    /// Number of child list changes
    pub cversion: i32,
    pub data_length: i32,
    pub num_children: i32,
}

/// Last known value of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub path: String,
    pub data: Bytes,
    pub stat: Stat,
}

impl NodeRecord {
    pub fn new(
        path: impl Into<String>,
        data: Bytes,
        stat: Stat,
    ) -> Self {
        Self {
            path: path.into(),
            data,
            stat,
        }
    }

    /// Final path segment
    pub fn name(&self) -> &str {
        super::node_name(&self.path)
    }
}

/// What a fired watch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: WatchEventKind,
    pub path: String,
}

impl WatchedEvent {
    pub fn new(
        kind: WatchEventKind,
        path: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Connection state of a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Link established or re-established; watches survived
    Connected,
    /// Link dropped; the session may still come back
    Disconnected,
    /// The service discarded the session and all its watches
    Expired,
    /// Closed by its owner
    Closed,
}

/// One item on a session's notification stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    State(SessionState),
    Watch(WatchedEvent),
}

/// One step of an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Create { path: String, data: Bytes },
    Delete { path: String, version: Option<i32> },
    SetData { path: String, data: Bytes, version: Option<i32> },
    Check { path: String, version: i32 },
}

impl Op {
    pub fn path(&self) -> &str {
        match self {
            Op::Create { path, .. } | Op::Delete { path, .. } | Op::SetData { path, .. } | Op::Check { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    Created(Stat),
    Deleted,
    SetData(Stat),
    Checked,
}
