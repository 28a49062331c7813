//! Dispatches unsolicited hub traffic.
//!
//! The read loop never calls into user code. It posts [`RouterEvent`]s to a
//! channel drained by one dispatcher task per connection, which updates the
//! registry and sensor tracker and then runs the registered callbacks.
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::messages::Notification;
use crate::registry::{Node, NodePatch, NodeRegistry};
use crate::sensor::SensorTracker;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    PeerClosed,
    ReadError(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => f.write_str("connection closed by hub"),
            DisconnectReason::ReadError(err) => write!(f, "read error: {}", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    Notification(Notification),
    Disconnected(DisconnectReason),
}

pub type NodeUpdateCallback = Arc<dyn Fn(&Node) + Send + Sync>;
pub type DisconnectCallback = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;

pub struct Router {
    registry: Arc<NodeRegistry>,
    sensors: Arc<SensorTracker>,
    on_node_update: RwLock<Option<NodeUpdateCallback>>,
    on_disconnect: RwLock<Option<DisconnectCallback>>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("nodes", &self.registry.len())
            .field("has_node_callback", &self.on_node_update.read().is_some())
            .field("has_disconnect_callback", &self.on_disconnect.read().is_some())
            .finish()
    }
}

impl Router {
    pub fn new(registry: Arc<NodeRegistry>, sensors: Arc<SensorTracker>) -> Self {
        Self {
            registry,
            sensors,
            on_node_update: RwLock::new(None),
            on_disconnect: RwLock::new(None),
        }
    }

    pub fn set_node_update_callback(&self, callback: NodeUpdateCallback) {
        *self.on_node_update.write() = Some(callback);
    }

    pub fn set_disconnect_callback(&self, callback: DisconnectCallback) {
        *self.on_disconnect.write() = Some(callback);
    }

    /// Applies one event. Callbacks run outside every internal lock, so they
    /// may call back into the client.
    pub fn dispatch(&self, event: RouterEvent) {
        match event {
            RouterEvent::Notification(Notification::PositionChanged(ntf)) => {
                debug!(
                    node_id = ntf.node_id,
                    state = %ntf.state,
                    position = ntf.current_position,
                    target = ntf.target_position,
                    "position changed"
                );
                self.patch(NodePatch::from(ntf));
            }
            RouterEvent::Notification(Notification::RunStatus(ntf)) => {
                debug!(
                    session_id = ntf.session_id,
                    node_id = ntf.node_id,
                    run_status = %ntf.run_status,
                    status_reply = %ntf.status_reply,
                    "run status"
                );
                self.sensors.apply_run_status_side_effect(ntf.status_reply);
                if let Some(state) = ntf.run_status.node_state() {
                    self.patch(NodePatch::state(ntf.node_id, state));
                }
            }
            RouterEvent::Notification(Notification::Limitation(ntf)) => {
                debug!(
                    node_id = ntf.node_id,
                    origin = %ntf.origin,
                    min = ntf.min_raw,
                    max = ntf.max_raw,
                    "limitation status"
                );
                self.sensors.apply_limitation(&ntf);
            }
            RouterEvent::Disconnected(reason) => {
                info!(%reason, "hub connection lost");
                let callback = self.on_disconnect.read().clone();
                if let Some(callback) = callback {
                    callback(&reason);
                }
            }
        }
    }

    fn patch(&self, patch: NodePatch) {
        let Some(node) = self.registry.patch(patch) else {
            debug!(node_id = patch.node_id, "update for unknown node ignored");
            return;
        };
        let callback = self.on_node_update.read().clone();
        if let Some(callback) = callback {
            callback(&node);
        }
    }

    /// Drains `events` until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<RouterEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
    }
}
