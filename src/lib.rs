//! Client core for a KLF-200 window/blind hub.
//!
//! Speaks the hub's SLIP-framed binary protocol over TLS 1.2, correlates
//! request/confirmation pairs while unsolicited notifications keep flowing,
//! caches discovered nodes and rain/wind state, and supervises the link with
//! periodic reconnect and refresh tasks.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod messages;
pub mod registry;
pub mod router;
pub mod sdk;
pub mod sensor;
pub mod supervisor;

pub use client::HubClient;
pub use codec::{Frame, FrameCodec, FrameError, FrameLayout};
pub use config::{HubConfig, SupervisorConfig};
pub use error::{HubError, Result};
pub use messages::{
    CommandId, LimitationOrigin, LimitationStatus, NodeState, NodeType, StatusReply,
};
pub use registry::{Node, NodeRegistry};
pub use router::DisconnectReason;
pub use sdk::{Gateway, LinkStatus};
pub use sensor::{SensorStatus, SensorTracker};
pub use supervisor::{HubLink, LinkState, Supervisor};
