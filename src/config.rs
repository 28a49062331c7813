//! Connection and supervision settings.
//!
//! Both structs deserialize with defaults for every field so an outer config
//! file only needs to name what differs (usually `host`, `password` and
//! `ca_cert_path`).
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

use crate::codec::FrameLayout;
use crate::error::{HubError, Result};

fn default_host() -> String {
    "192.168.1.100".to_owned()
}

fn default_port() -> u16 {
    51200
}

fn default_ca_cert_path() -> PathBuf {
    PathBuf::from("velux-ca.pem")
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_reply_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_auth_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_notification_enable_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_enumerate_quiet_period() -> Duration {
    Duration::from_secs(5)
}

fn default_limitation_quiet_period() -> Duration {
    Duration::from_secs(2)
}

fn default_reply_queue_capacity() -> usize {
    100
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_sequence_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

/// How to reach and talk to the hub.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    /// PEM file holding the hub vendor's root certificate.
    #[serde(default = "default_ca_cert_path")]
    pub ca_cert_path: PathBuf,
    #[serde(default)]
    pub frame_layout: FrameLayout,
    #[serde(default = "default_dial_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub dial_timeout: Duration,
    /// Wait for a confirmation frame.
    #[serde(default = "default_reply_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reply_timeout: Duration,
    #[serde(default = "default_auth_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub auth_timeout: Duration,
    #[serde(default = "default_notification_enable_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub notification_enable_timeout: Duration,
    /// Silence after which an enumeration is considered complete.
    #[serde(default = "default_enumerate_quiet_period")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub enumerate_quiet_period: Duration,
    /// Silence after which a limitation query is considered complete.
    #[serde(default = "default_limitation_quiet_period")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub limitation_quiet_period: Duration,
    #[serde(default = "default_reply_queue_capacity")]
    pub reply_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: String::new(),
            ca_cert_path: default_ca_cert_path(),
            frame_layout: FrameLayout::default(),
            dial_timeout: default_dial_timeout(),
            reply_timeout: default_reply_timeout(),
            auth_timeout: default_auth_timeout(),
            notification_enable_timeout: default_notification_enable_timeout(),
            enumerate_quiet_period: default_enumerate_quiet_period(),
            limitation_quiet_period: default_limitation_quiet_period(),
            reply_queue_capacity: default_reply_queue_capacity(),
        }
    }
}

impl HubConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(HubError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(HubError::Config("port must be between 1 and 65535".into()));
        }
        if self.reply_queue_capacity == 0 {
            return Err(HubError::Config(
                "reply_queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Periodic recovery settings for the supervisor.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_reconnect_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub reconnect_interval: Duration,
    #[serde(default = "default_refresh_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub refresh_interval: Duration,
    /// Overall budget for one connect, authenticate and enumerate sequence.
    #[serde(default = "default_sequence_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sequence_timeout: Duration,
    #[serde(default = "default_shutdown_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: default_reconnect_interval(),
            refresh_interval: default_refresh_interval(),
            sequence_timeout: default_sequence_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_interval.is_zero() || self.refresh_interval.is_zero() {
            return Err(HubError::Config(
                "supervisor intervals must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
