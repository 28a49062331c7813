//! Cache of the nodes known to the hub.
//!
//! A full enumeration swaps the whole map in one write; notifications only
//! touch entries that already exist. Readers always receive owned copies.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::messages::{
    raw_to_percent, NodeInformation, NodeState, NodeType, PositionChanged, Velocity,
};

/// One device managed by the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: u8,
    pub name: String,
    pub node_type: NodeType,
    pub state: NodeState,
    pub current_position_raw: u16,
    pub position_percent: f64,
    pub target_position_raw: u16,
    pub target_percent: f64,
    pub velocity: Velocity,
    pub last_update: DateTime<Utc>,
}

impl Node {
    pub fn from_information(info: NodeInformation) -> Self {
        Self {
            id: info.node_id,
            name: info.name,
            node_type: info.node_type,
            state: info.state,
            current_position_raw: info.current_position,
            position_percent: raw_to_percent(info.current_position),
            target_position_raw: info.target_position,
            target_percent: raw_to_percent(info.target_position),
            velocity: info.velocity,
            last_update: Utc::now(),
        }
    }

    fn set_current(&mut self, raw: u16) {
        self.current_position_raw = raw;
        self.position_percent = raw_to_percent(raw);
    }

    fn set_target(&mut self, raw: u16) {
        self.target_position_raw = raw;
        self.target_percent = raw_to_percent(raw);
    }
}

/// Partial update carried by a notification. Absent fields are left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePatch {
    pub node_id: u8,
    pub state: Option<NodeState>,
    pub current_position_raw: Option<u16>,
    pub target_position_raw: Option<u16>,
}

impl NodePatch {
    pub fn state(node_id: u8, state: NodeState) -> Self {
        Self {
            node_id,
            state: Some(state),
            current_position_raw: None,
            target_position_raw: None,
        }
    }
}

impl From<PositionChanged> for NodePatch {
    fn from(ntf: PositionChanged) -> Self {
        Self {
            node_id: ntf.node_id,
            state: Some(ntf.state),
            current_position_raw: Some(ntf.current_position),
            target_position_raw: Some(ntf.target_position),
        }
    }
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<BTreeMap<u8, Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a freshly enumerated set. Ids missing from `nodes` disappear.
    pub fn replace(&self, nodes: impl IntoIterator<Item = Node>) {
        let fresh: BTreeMap<u8, Node> = nodes.into_iter().map(|n| (n.id, n)).collect();
        *self.nodes.write() = fresh;
    }

    pub fn get(&self, id: u8) -> Option<Node> {
        self.nodes.read().get(&id).cloned()
    }

    /// Snapshot ordered by node id.
    pub fn get_all(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<u8> {
        self.nodes.read().keys().copied().collect()
    }

    /// Applies `patch` to a known node and returns the updated copy.
    /// Unknown ids are ignored.
    pub fn patch(&self, patch: NodePatch) -> Option<Node> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&patch.node_id)?;
        if let Some(state) = patch.state {
            node.state = state;
        }
        if let Some(raw) = patch.current_position_raw {
            node.set_current(raw);
        }
        if let Some(raw) = patch.target_position_raw {
            node.set_target(raw);
        }
        node.last_update = Utc::now();
        Some(node.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}
