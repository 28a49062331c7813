use thiserror::Error;

use crate::codec::FrameError;
use crate::messages::{CommandId, HubErrorCode, ParseError};

/// Errors surfaced by the hub client and its supervisor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HubError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("malformed reply: {0}")]
    Parse(#[from] ParseError),
    #[error("not connected to hub")]
    NotConnected,
    #[error("not authenticated with hub")]
    NotAuthenticated,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("authentication failed: hub returned status {status}")]
    AuthenticationFailed { status: u8 },
    #[error("authentication timed out")]
    AuthenticationTimeout,
    #[error("timed out waiting for {command}")]
    Timeout { command: CommandId },
    #[error("hub reported error: {0}")]
    HubRejected(HubErrorCode),
    #[error("command rejected with status {status}")]
    CommandRejected { status: u8 },
    #[error("position {0} outside 0..=100 percent")]
    InvalidPercent(f64),
    #[error("{count} node ids exceed the 20-entry index array")]
    TooManyNodes { count: usize },
    #[error("operation cancelled by disconnect")]
    Cancelled,
}

impl HubError {
    /// Failures of the link itself, as opposed to a single request.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HubError::Io(_)
                | HubError::Tls(_)
                | HubError::NotConnected
                | HubError::ConnectTimeout
                | HubError::Cancelled
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HubError::Timeout { .. } | HubError::AuthenticationTimeout | HubError::ConnectTimeout
        )
    }
}

pub type Result<T, E = HubError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert!(HubError::NotConnected.is_transport());
        assert!(!HubError::AuthenticationFailed { status: 1 }.is_transport());
        assert!(HubError::Timeout {
            command: CommandId::CommandSendCfm
        }
        .is_timeout());
        assert_eq!(
            HubError::Timeout {
                command: CommandId::CommandSendCfm
            }
            .to_string(),
            "timed out waiting for GW_COMMAND_SEND_CFM"
        );
    }
}
