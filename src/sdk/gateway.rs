use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::client::HubClient;
use crate::config::{HubConfig, SupervisorConfig};
use crate::error::Result;
use crate::registry::Node;
use crate::router::DisconnectReason;
use crate::sensor::SensorStatus;
use crate::supervisor::{LinkState, Supervisor};

/// Health snapshot of the hub link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub connected: bool,
    pub authenticated: bool,
    pub state: LinkState,
    pub node_count: usize,
}

/// Supervised hub client: the surface an outer service talks to.
///
/// # Guarantees
/// * Connect, reconnect and the periodic tasks never run a sequence
///   concurrently.
/// * Reads (`get_node`, `get_all_nodes`, `get_sensor_status`, `status`) never
///   wait on the hub.
/// * Commands are not retried; only link establishment is.
#[derive(Debug)]
pub struct Gateway {
    client: Arc<HubClient>,
    supervisor: Supervisor<HubClient>,
}

impl Gateway {
    /// # Errors
    /// Returns `HubError::Config` when either config fails validation.
    pub fn new(hub: HubConfig, supervision: SupervisorConfig) -> Result<Self> {
        supervision.validate()?;
        let client = Arc::new(HubClient::new(hub)?);
        let supervisor = Supervisor::new(client.clone(), supervision);
        Ok(Self { client, supervisor })
    }

    pub fn client(&self) -> &Arc<HubClient> {
        &self.client
    }

    /// Connects once and starts background recovery. A failed first attempt
    /// is returned but recovery keeps running.
    pub async fn start(&self) -> Result<usize> {
        self.supervisor.start().await
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    /// Connects, authenticates and enumerates nodes.
    pub async fn connect(&self) -> Result<usize> {
        self.supervisor.connect().await
    }

    pub async fn disconnect(&self) {
        self.supervisor.disconnect().await;
    }

    /// Drops the current session and runs a fresh connect sequence.
    pub async fn reconnect(&self) -> Result<usize> {
        self.supervisor.reconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_authenticated()
    }

    pub async fn enumerate_nodes(&self) -> Result<Vec<Node>> {
        self.client.enumerate_nodes().await
    }

    pub fn get_node(&self, node_id: u8) -> Option<Node> {
        self.client.get_node(node_id)
    }

    pub fn get_all_nodes(&self) -> Vec<Node> {
        self.client.get_all_nodes()
    }

    pub async fn set_position(&self, node_id: u8, percent: f64) -> Result<()> {
        self.client.set_position(node_id, percent).await
    }

    pub async fn open(&self, node_id: u8) -> Result<()> {
        self.client.open(node_id).await
    }

    pub async fn close(&self, node_id: u8) -> Result<()> {
        self.client.close(node_id).await
    }

    pub async fn stop(&self, node_id: u8) -> Result<()> {
        self.client.stop(node_id).await
    }

    pub fn get_sensor_status(&self) -> SensorStatus {
        self.client.get_sensor_status()
    }

    pub async fn refresh_sensor_status(&self, node_ids: &[u8], deadline: Duration) -> SensorStatus {
        self.client.refresh_sensor_status(node_ids, deadline).await
    }

    pub fn on_node_update<F>(&self, callback: F)
    where
        F: Fn(&Node) + Send + Sync + 'static,
    {
        self.client.on_node_update(callback);
    }

    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.client.on_disconnect(callback);
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            connected: self.client.is_connected(),
            authenticated: self.client.is_authenticated(),
            state: self.supervisor.state(),
            node_count: self.client.node_count(),
        }
    }

    /// Swaps the hub settings. The live session keeps the old ones until the
    /// next connect or reconnect.
    pub fn update_config(&self, config: HubConfig) -> Result<()> {
        self.client.update_config(config)?;
        info!("hub configuration updated, applies on next connect");
        Ok(())
    }
}
