use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tracing::{debug, info, warn};

use crate::codec::Frame;
use crate::config::HubConfig;
use crate::connection::Connection;
use crate::correlator::Correlator;
use crate::error::{HubError, Result};
use crate::messages::{
    self, parse_all_nodes_confirm, parse_command_confirm, parse_error_notification,
    parse_limitation_confirm, parse_limitation_status, parse_node_information,
    parse_password_confirm, percent_to_raw, CommandId, LimitationStatus, Priority,
    MAX_INDEX_ARRAY, ORIGINATOR_USER, POSITION_CURRENT,
};
use crate::registry::{Node, NodeRegistry};
use crate::router::{DisconnectReason, Router};
use crate::sensor::{SensorStatus, SensorTracker};
use crate::supervisor::HubLink;

/// Typed request/response operations against one hub.
///
/// # Guarantees
/// * At most one request is on the wire at a time; concurrent callers queue
///   on the correlator turn.
/// * Every request waits at most its configured timeout.
/// * Registry and sensor reads never wait on an outstanding request.
#[derive(Debug)]
pub struct HubClient {
    config: RwLock<HubConfig>,
    connection: Connection,
    correlator: Arc<Correlator>,
    registry: Arc<NodeRegistry>,
    sensors: Arc<SensorTracker>,
    router: Arc<Router>,
}

impl HubClient {
    pub fn new(config: HubConfig) -> Result<Self> {
        config.validate()?;
        let correlator = Arc::new(Correlator::new(config.reply_queue_capacity));
        let registry = Arc::new(NodeRegistry::new());
        let sensors = Arc::new(SensorTracker::new());
        let router = Arc::new(Router::new(registry.clone(), sensors.clone()));
        Ok(Self {
            config: RwLock::new(config),
            connection: Connection::new(correlator.clone(), router.clone()),
            correlator,
            registry,
            sensors,
            router,
        })
    }

    pub fn config(&self) -> HubConfig {
        self.config.read().clone()
    }

    /// Replaces the settings; they apply from the next connect.
    pub fn update_config(&self, config: HubConfig) -> Result<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    /// Opens the TLS session to the configured hub.
    pub async fn connect(&self) -> Result<()> {
        let config = self.config();
        self.connection.connect(&config).await
    }

    /// Uses an already established stream as the hub session, for transports
    /// set up outside this crate.
    pub async fn attach<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let layout = self.config.read().frame_layout;
        self.connection.attach(stream, layout).await;
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.connection.is_authenticated()
    }

    /// Sends the password and then enables position notifications.
    ///
    /// # Errors
    /// `AuthenticationFailed` when the hub answers with a non-zero status and
    /// `AuthenticationTimeout` when it does not answer in `auth_timeout`.
    /// A failure to enable notifications is logged, not returned.
    pub async fn authenticate(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(HubError::NotConnected);
        }
        let config = self.config();
        {
            let _turn = self.correlator.begin().await;
            self.connection
                .send(messages::password_enter(&config.password))
                .await?;
            let reply = match self
                .correlator
                .expect(CommandId::PasswordEnterCfm, config.auth_timeout)
                .await
            {
                Ok(reply) => reply,
                Err(HubError::Timeout { .. }) => return Err(HubError::AuthenticationTimeout),
                Err(err) => return Err(err),
            };
            let status = parse_password_confirm(&reply.payload)?;
            if status != 0 {
                warn!(status, "hub rejected password");
                return Err(HubError::AuthenticationFailed { status });
            }
            self.connection.set_authenticated(true);
            info!("authenticated with hub");
        }

        if let Err(err) = self
            .enable_notifications(config.notification_enable_timeout)
            .await
        {
            warn!(error = %err, "position notifications unavailable, relying on periodic refresh");
        }
        Ok(())
    }

    async fn enable_notifications(&self, wait: Duration) -> Result<()> {
        let _turn = self.correlator.begin().await;
        self.connection
            .send(messages::house_status_monitor_enable())
            .await?;
        self.correlator
            .expect(CommandId::HouseStatusMonitorEnableCfm, wait)
            .await?;
        debug!("house status monitor enabled");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if !self.connection.is_connected() {
            return Err(HubError::NotConnected);
        }
        if !self.connection.is_authenticated() {
            return Err(HubError::NotAuthenticated);
        }
        Ok(())
    }

    async fn request(&self, frame: Frame, reply: CommandId, wait: Duration) -> Result<Frame> {
        self.connection.send(frame).await?;
        self.correlator.expect(reply, wait).await
    }

    /// Reads the full node table and replaces the registry with it.
    ///
    /// Descriptors stream in after the confirmation. The stream ends with the
    /// hub's finished notification or, failing that, once
    /// `enumerate_quiet_period` passes without a frame.
    pub async fn enumerate_nodes(&self) -> Result<Vec<Node>> {
        self.ensure_ready()?;
        let config = self.config();
        let _turn = self.correlator.begin().await;

        let confirm = self
            .request(
                messages::get_all_nodes(),
                CommandId::GetAllNodesInformationCfm,
                config.reply_timeout,
            )
            .await?;
        let summary = parse_all_nodes_confirm(&confirm.payload)?;

        let mut nodes = Vec::with_capacity(usize::from(summary.total));
        if summary.has_nodes {
            loop {
                let Some(frame) = self
                    .correlator
                    .next_frame(config.enumerate_quiet_period)
                    .await?
                else {
                    debug!(received = nodes.len(), "enumeration ended on quiet period");
                    break;
                };
                match CommandId::from(frame.command) {
                    CommandId::GetAllNodesInformationNtf => {
                        match parse_node_information(&frame.payload) {
                            Ok(info) => nodes.push(Node::from_information(info)),
                            Err(err) => warn!(error = %err, "skipping malformed node descriptor"),
                        }
                    }
                    CommandId::GetAllNodesInformationFinishedNtf => break,
                    CommandId::ErrorNtf => {
                        return Err(HubError::HubRejected(parse_error_notification(
                            &frame.payload,
                        )))
                    }
                    other => debug!(command = %other, "skipping frame during enumeration"),
                }
            }
        }

        info!(
            count = nodes.len(),
            reported = summary.total,
            "node enumeration complete"
        );
        self.registry.replace(nodes.iter().cloned());
        Ok(nodes)
    }

    /// Moves `node_id` to `percent` closed (0 open, 100 closed).
    ///
    /// # Errors
    /// `InvalidPercent` for values outside `0..=100`, checked before anything
    /// is sent. `CommandRejected` when the confirmation carries a failure
    /// status.
    pub async fn set_position(&self, node_id: u8, percent: f64) -> Result<()> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(HubError::InvalidPercent(percent));
        }
        self.send_command(node_id, percent_to_raw(percent)).await
    }

    pub async fn open(&self, node_id: u8) -> Result<()> {
        self.set_position(node_id, 0.0).await
    }

    pub async fn close(&self, node_id: u8) -> Result<()> {
        self.set_position(node_id, 100.0).await
    }

    /// Halts a moving node by targeting its current position.
    pub async fn stop(&self, node_id: u8) -> Result<()> {
        self.send_command(node_id, POSITION_CURRENT).await
    }

    async fn send_command(&self, node_id: u8, main_parameter: u16) -> Result<()> {
        self.ensure_ready()?;
        let config = self.config();
        let session_id = self.connection.next_session_id();
        let _turn = self.correlator.begin().await;

        let reply = self
            .request(
                messages::command_send(
                    session_id,
                    ORIGINATOR_USER,
                    Priority::UserLevel2,
                    &[node_id],
                    main_parameter,
                ),
                CommandId::CommandSendCfm,
                config.reply_timeout,
            )
            .await?;
        let confirm = parse_command_confirm(&reply.payload)?;
        if !confirm.accepted() {
            warn!(node_id, status = confirm.status, "hub rejected command");
            return Err(HubError::CommandRejected {
                status: confirm.status,
            });
        }
        if confirm.status == 1 {
            debug!(node_id, session_id, "hub accepted command while busy");
        }
        info!(node_id, session_id, position = main_parameter, "command accepted");
        Ok(())
    }

    /// Queries limitation state for up to 20 nodes and returns every report
    /// received before `limitation_quiet_period` of silence.
    pub async fn query_limitation_status(&self, node_ids: &[u8]) -> Result<Vec<LimitationStatus>> {
        if node_ids.len() > MAX_INDEX_ARRAY {
            return Err(HubError::TooManyNodes {
                count: node_ids.len(),
            });
        }
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_ready()?;
        let config = self.config();
        let session_id = self.connection.next_session_id();
        let _turn = self.correlator.begin().await;
        let _mirror = self.correlator.mirror_limitations();

        let reply = self
            .request(
                messages::get_limitation_status(session_id, node_ids),
                CommandId::GetLimitationStatusCfm,
                config.reply_timeout,
            )
            .await?;
        let confirm = parse_limitation_confirm(&reply.payload)?;
        if !confirm.accepted() {
            return Err(HubError::CommandRejected {
                status: confirm.status,
            });
        }

        let mut reports = Vec::new();
        while let Some(frame) = self
            .correlator
            .next_frame(config.limitation_quiet_period)
            .await?
        {
            match CommandId::from(frame.command) {
                CommandId::LimitationStatusNtf => match parse_limitation_status(&frame.payload) {
                    Ok(status) => reports.push(status),
                    Err(err) => warn!(error = %err, "skipping malformed limitation report"),
                },
                CommandId::ErrorNtf => {
                    return Err(HubError::HubRejected(parse_error_notification(
                        &frame.payload,
                    )))
                }
                other => debug!(command = %other, "skipping frame during limitation query"),
            }
        }
        debug!(count = reports.len(), "limitation query complete");
        Ok(reports)
    }

    /// Refreshes rain and wind state from the hub within `deadline`.
    ///
    /// An empty `node_ids` queries every known node. Failures and silence are
    /// inconclusive: flags keep their previous values and only `last_update`
    /// moves. Never fails; returns the resulting status.
    pub async fn refresh_sensor_status(&self, node_ids: &[u8], deadline: Duration) -> SensorStatus {
        let ids = if node_ids.is_empty() {
            self.registry.ids()
        } else {
            node_ids.to_vec()
        };

        let refresh = async {
            for chunk in ids.chunks(MAX_INDEX_ARRAY) {
                match self.query_limitation_status(chunk).await {
                    Ok(reports) if reports.is_empty() => self.sensors.record_attempt(),
                    Ok(reports) => debug!(count = reports.len(), "limitation reports received"),
                    Err(err) => {
                        warn!(error = %err, "sensor refresh failed, keeping previous readings");
                        self.sensors.record_attempt();
                    }
                }
            }
        };
        if ids.is_empty() {
            self.sensors.record_attempt();
        } else if time::timeout(deadline, refresh).await.is_err() {
            warn!(?deadline, "sensor refresh timed out, keeping previous readings");
            self.sensors.record_attempt();
        }
        self.sensors.status()
    }

    pub fn get_node(&self, node_id: u8) -> Option<Node> {
        self.registry.get(node_id)
    }

    pub fn get_all_nodes(&self) -> Vec<Node> {
        self.registry.get_all()
    }

    pub fn node_count(&self) -> usize {
        self.registry.len()
    }

    pub fn get_sensor_status(&self) -> SensorStatus {
        self.sensors.status()
    }

    /// Registers the callback run for every node changed by a notification.
    /// It runs on the dispatcher task, so it must not block.
    pub fn on_node_update<F>(&self, callback: F)
    where
        F: Fn(&Node) + Send + Sync + 'static,
    {
        self.router.set_node_update_callback(Arc::new(callback));
    }

    /// Registers the callback run when the hub drops the session.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.router.set_disconnect_callback(Arc::new(callback));
    }
}

#[async_trait]
impl HubLink for HubClient {
    async fn connect(&self) -> Result<()> {
        HubClient::connect(self).await
    }

    async fn authenticate(&self) -> Result<()> {
        HubClient::authenticate(self).await
    }

    async fn enumerate_nodes(&self) -> Result<usize> {
        HubClient::enumerate_nodes(self).await.map(|nodes| nodes.len())
    }

    async fn disconnect(&self) {
        HubClient::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        HubClient::is_connected(self)
    }

    fn is_authenticated(&self) -> bool {
        HubClient::is_authenticated(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_percent_rejected_before_transport() {
        let client = HubClient::new(HubConfig::default()).unwrap();
        for bad in [-0.1, 100.5, f64::NAN, f64::INFINITY] {
            let err = client.set_position(1, bad).await.unwrap_err();
            assert!(matches!(err, HubError::InvalidPercent(_)), "{bad}");
        }
        // a valid value reaches the transport check
        let err = client.set_position(1, 50.0).await.unwrap_err();
        assert!(matches!(err, HubError::NotConnected));
    }

    #[tokio::test]
    async fn limitation_query_bounds() {
        let client = HubClient::new(HubConfig::default()).unwrap();
        let ids: Vec<u8> = (0..21).collect();
        assert!(matches!(
            client.query_limitation_status(&ids).await,
            Err(HubError::TooManyNodes { count: 21 })
        ));
        assert!(client.query_limitation_status(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_while_offline_only_records_attempt() {
        let client = HubClient::new(HubConfig::default()).unwrap();
        let status = client
            .refresh_sensor_status(&[1, 2], Duration::from_secs(1))
            .await;
        assert!(!status.rain_detected && !status.wind_detected);
        assert!(status.last_update.is_some());
    }

    #[test]
    fn update_config_validates() {
        let client = HubClient::new(HubConfig::default()).unwrap();
        let bad = HubConfig {
            host: String::new(),
            ..HubConfig::default()
        };
        assert!(client.update_config(bad).is_err());
        assert_eq!(client.config().host, "192.168.1.100");
    }
}
