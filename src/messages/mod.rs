//! Typed request builders and reply/notification parsers for the hub API.
//!
//! Builders return a [`Frame`] ready for the codec; parsers take the frame
//! payload and fail with [`ParseError`] when it is shorter than the fields
//! they read. Offsets follow the gateway's published field layout.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use thiserror::Error;

use crate::codec::Frame;

pub mod types;

pub use types::{
    percent_to_raw, raw_to_percent, CommandId, HubErrorCode, LimitationOrigin, NodeState,
    NodeType, Priority, RunStatus, StatusReply, Velocity, POSITION_CURRENT, POSITION_DEFAULT,
    POSITION_IGNORE, POSITION_MAX, POSITION_MIN,
};

/// Maximum number of node ids carried by one index array.
pub const MAX_INDEX_ARRAY: usize = 20;
/// Password field width.
pub const PASSWORD_LEN: usize = 32;
/// Command originator used for everything this client sends.
pub const ORIGINATOR_USER: u8 = 1;

const PASSWORD_BASE64_PREFIX: &str = "base64:";
const NAME_OFFSET: usize = 4;
const NAME_LEN: usize = 64;
const FUNCTIONAL_PARAMETERS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{what} payload too short: {len} bytes, need {min}")]
    Truncated {
        what: &'static str,
        len: usize,
        min: usize,
    },
}

fn require(what: &'static str, data: &[u8], min: usize) -> Result<(), ParseError> {
    if data.len() < min {
        return Err(ParseError::Truncated {
            what,
            len: data.len(),
            min,
        });
    }
    Ok(())
}

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn put_index_array(buf: &mut BytesMut, node_ids: &[u8]) {
    let count = node_ids.len().min(MAX_INDEX_ARRAY);
    buf.put_u8(count as u8);
    buf.put_slice(&node_ids[..count]);
    buf.put_bytes(0, MAX_INDEX_ARRAY - count);
}

/// `GW_PASSWORD_ENTER_REQ`. A `base64:` prefix selects decoded bytes when they
/// fit the 32-byte field; anything else is sent as literal text.
pub fn password_enter(password: &str) -> Frame {
    let mut field = [0u8; PASSWORD_LEN];
    let decoded = password
        .strip_prefix(PASSWORD_BASE64_PREFIX)
        .filter(|rest| !rest.is_empty())
        .and_then(|rest| BASE64.decode(rest).ok())
        .filter(|bytes| bytes.len() <= PASSWORD_LEN);
    let secret = decoded.unwrap_or_else(|| password.as_bytes().to_vec());
    let len = secret.len().min(PASSWORD_LEN);
    field[..len].copy_from_slice(&secret[..len]);
    Frame::new(CommandId::PasswordEnterReq, field.to_vec())
}

/// `GW_HOUSE_STATUS_MONITOR_ENABLE_REQ`: turns on position-change notifications.
pub fn house_status_monitor_enable() -> Frame {
    Frame::new(CommandId::HouseStatusMonitorEnableReq, Vec::new())
}

/// `GW_GET_ALL_NODES_INFORMATION_REQ`.
pub fn get_all_nodes() -> Frame {
    Frame::new(CommandId::GetAllNodesInformationReq, Vec::new())
}

/// `GW_COMMAND_SEND_REQ` moving `node_ids` (at most 20) to `main_parameter`.
///
/// Functional parameters are not activated and carry the ignore sentinel.
pub fn command_send(
    session_id: u16,
    originator: u8,
    priority: Priority,
    node_ids: &[u8],
    main_parameter: u16,
) -> Frame {
    let mut buf = BytesMut::with_capacity(66);
    buf.put_u16(session_id);
    buf.put_u8(originator);
    buf.put_u8(priority as u8);
    // parameter active: main parameter
    buf.put_u8(0);
    // FPI1 / FPI2: no functional parameter active
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_u16(main_parameter);
    for _ in 0..FUNCTIONAL_PARAMETERS {
        buf.put_u16(POSITION_IGNORE);
    }
    put_index_array(&mut buf, node_ids);
    // priority level lock, PL 0-3, PL 4-7, lock time
    buf.put_bytes(0, 4);
    Frame::new(CommandId::CommandSendReq, buf.freeze())
}

/// `GW_GET_LIMITATION_STATUS_REQ` for the main parameter's minimum limitation.
pub fn get_limitation_status(session_id: u16, node_ids: &[u8]) -> Frame {
    let mut buf = BytesMut::with_capacity(25);
    buf.put_u16(session_id);
    put_index_array(&mut buf, node_ids);
    // parameter id: main parameter
    buf.put_u8(0);
    // limitation type: minimum
    buf.put_u8(0);
    Frame::new(CommandId::GetLimitationStatusReq, buf.freeze())
}

/// Returns `Ok(0)` on success; any other status byte is a rejection.
pub fn parse_password_confirm(data: &[u8]) -> Result<u8, ParseError> {
    require("password confirm", data, 1)?;
    Ok(data[0])
}

/// Confirmation of an enumeration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllNodesConfirm {
    /// `false` when the hub reports an empty system table.
    pub has_nodes: bool,
    pub total: u8,
}

pub fn parse_all_nodes_confirm(data: &[u8]) -> Result<AllNodesConfirm, ParseError> {
    require("all nodes confirm", data, 1)?;
    Ok(AllNodesConfirm {
        has_nodes: data[0] == 0,
        total: data.get(1).copied().unwrap_or(0),
    })
}

/// One node descriptor from `GW_GET_ALL_NODES_INFORMATION_NTF`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInformation {
    pub node_id: u8,
    pub name: String,
    pub velocity: Velocity,
    pub node_type: NodeType,
    pub state: NodeState,
    pub current_position: u16,
    pub target_position: u16,
}

/// Parses the 124-byte node descriptor; fields past the target position are
/// optional.
pub fn parse_node_information(data: &[u8]) -> Result<NodeInformation, ParseError> {
    require("node information", data, 89)?;
    let name_field = &data[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
    let name_len = name_field
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(NAME_LEN);
    Ok(NodeInformation {
        node_id: data[0],
        name: String::from_utf8_lossy(&name_field[..name_len]).into_owned(),
        velocity: Velocity::from(data[68]),
        node_type: NodeType::from(be16(data, 69)),
        state: NodeState::from(data[84]),
        current_position: be16(data, 85),
        target_position: be16(data, 87),
    })
}

/// `GW_COMMAND_SEND_CFM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandConfirm {
    pub session_id: u16,
    pub status: u8,
}

impl CommandConfirm {
    /// 0 is accepted, 1 is accepted while the node is busy.
    pub fn accepted(&self) -> bool {
        self.status <= 1
    }
}

pub fn parse_command_confirm(data: &[u8]) -> Result<CommandConfirm, ParseError> {
    require("command confirm", data, 3)?;
    Ok(CommandConfirm {
        session_id: be16(data, 0),
        status: data[2],
    })
}

/// Same layout as the command confirmation: session id then status.
pub fn parse_limitation_confirm(data: &[u8]) -> Result<CommandConfirm, ParseError> {
    require("limitation confirm", data, 3)?;
    Ok(CommandConfirm {
        session_id: be16(data, 0),
        status: data[2],
    })
}

/// `GW_NODE_STATE_POSITION_CHANGED_NTF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionChanged {
    pub node_id: u8,
    pub state: NodeState,
    pub current_position: u16,
    pub target_position: u16,
}

pub fn parse_position_changed(data: &[u8]) -> Result<PositionChanged, ParseError> {
    require("position changed", data, 6)?;
    Ok(PositionChanged {
        node_id: data[0],
        state: NodeState::from(data[1]),
        current_position: be16(data, 2),
        target_position: be16(data, 4),
    })
}

/// `GW_COMMAND_RUN_STATUS_NTF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatusNotification {
    pub session_id: u16,
    pub node_id: u8,
    pub run_status: RunStatus,
    pub status_reply: StatusReply,
}

pub fn parse_run_status(data: &[u8]) -> Result<RunStatusNotification, ParseError> {
    require("run status", data, 13)?;
    Ok(RunStatusNotification {
        session_id: be16(data, 0),
        node_id: data[3],
        run_status: RunStatus::from(data[7]),
        status_reply: StatusReply::from(data[8]),
    })
}

/// One entry of a limitation query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitationStatus {
    pub node_id: u8,
    pub origin: LimitationOrigin,
    pub min_raw: u16,
    pub max_raw: u16,
}

pub fn parse_limitation_status(data: &[u8]) -> Result<LimitationStatus, ParseError> {
    require("limitation status", data, 9)?;
    Ok(LimitationStatus {
        node_id: data[2],
        min_raw: be16(data, 4),
        max_raw: be16(data, 6),
        origin: LimitationOrigin::from(data[8]),
    })
}

pub fn parse_error_notification(data: &[u8]) -> HubErrorCode {
    HubErrorCode::from(data.first().copied().unwrap_or(0))
}

/// Unsolicited hub traffic, routed without a waiting caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notification {
    PositionChanged(PositionChanged),
    RunStatus(RunStatusNotification),
    Limitation(LimitationStatus),
}

impl Notification {
    /// Parses `frame` when its command is unsolicited; `Ok(None)` otherwise.
    pub fn parse(frame: &Frame) -> Result<Option<Self>, ParseError> {
        let notification = match CommandId::from(frame.command) {
            CommandId::NodeStatePositionChangedNtf => {
                Notification::PositionChanged(parse_position_changed(&frame.payload)?)
            }
            CommandId::CommandRunStatusNtf => {
                Notification::RunStatus(parse_run_status(&frame.payload)?)
            }
            CommandId::LimitationStatusNtf => {
                Notification::Limitation(parse_limitation_status(&frame.payload)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(notification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_descriptor(id: u8, name: &str, node_type: u16, raw: u16) -> Vec<u8> {
        let mut data = vec![0u8; 124];
        data[0] = id;
        data[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name.as_bytes());
        data[68] = 2;
        data[69..71].copy_from_slice(&node_type.to_be_bytes());
        data[84] = 5;
        data[85..87].copy_from_slice(&raw.to_be_bytes());
        data[87..89].copy_from_slice(&raw.to_be_bytes());
        data
    }

    #[test]
    fn password_is_zero_padded() {
        let frame = password_enter("velux123");
        assert_eq!(frame.command, u16::from(CommandId::PasswordEnterReq));
        assert_eq!(frame.payload.len(), PASSWORD_LEN);
        assert_eq!(&frame.payload[..8], b"velux123");
        assert!(frame.payload[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn password_base64_prefix_is_decoded() {
        let frame = password_enter("base64:AAEC");
        assert_eq!(&frame.payload[..3], &[0, 1, 2]);

        // not valid base64: sent verbatim
        let frame = password_enter("base64:***");
        assert_eq!(&frame.payload[..10], b"base64:***");
    }

    #[test]
    fn command_send_layout() {
        let frame = command_send(0x1234, ORIGINATOR_USER, Priority::UserLevel2, &[7, 9], 0xC800);
        let p = &frame.payload;
        assert_eq!(p.len(), 66);
        assert_eq!(&p[0..2], &[0x12, 0x34]);
        assert_eq!(p[2], ORIGINATOR_USER);
        assert_eq!(p[3], Priority::UserLevel2 as u8);
        assert_eq!(&p[7..9], &[0xC8, 0x00]);
        assert!(p[9..41].chunks(2).all(|fp| fp == [0xD4, 0x00]));
        assert_eq!(p[41], 2);
        assert_eq!(&p[42..44], &[7, 9]);
        assert!(p[44..62].iter().all(|b| *b == 0));
    }

    #[test]
    fn index_array_is_capped_at_twenty() {
        let ids: Vec<u8> = (1..=25).collect();
        let frame = get_limitation_status(1, &ids);
        assert_eq!(frame.payload.len(), 25);
        assert_eq!(frame.payload[2], 20);
        assert_eq!(frame.payload[22], 20);
    }

    #[test]
    fn parses_node_descriptor() {
        let info = parse_node_information(&node_descriptor(3, "Window", 0x0101, 25_600)).unwrap();
        assert_eq!(info.node_id, 3);
        assert_eq!(info.name, "Window");
        assert_eq!(info.node_type, NodeType::WindowOpener);
        assert_eq!(info.velocity, Velocity::Fast);
        assert_eq!(info.state, NodeState::Done);
        assert_eq!(info.current_position, 25_600);
        assert_eq!(info.target_position, 25_600);
    }

    #[test]
    fn short_descriptor_is_rejected() {
        let err = parse_node_information(&[0u8; 40]).unwrap_err();
        assert_eq!(
            err,
            ParseError::Truncated {
                what: "node information",
                len: 40,
                min: 89
            }
        );
    }

    #[test]
    fn parses_run_status_and_limitation() {
        let run = [0x00, 0x05, 0x00, 0x04, 0x00, 0xC8, 0x00, 0x01, 0xE3, 0, 0, 0, 0];
        let parsed = parse_run_status(&run).unwrap();
        assert_eq!(parsed.session_id, 5);
        assert_eq!(parsed.node_id, 4);
        assert_eq!(parsed.run_status, RunStatus::ExecutionFailed);
        assert_eq!(parsed.status_reply, StatusReply::LimitationByRain);

        let lim = [0x00, 0x05, 0x02, 0x00, 0x00, 0x00, 0xC8, 0x00, 0x09, 0xFF];
        let parsed = parse_limitation_status(&lim).unwrap();
        assert_eq!(parsed.node_id, 2);
        assert_eq!(parsed.origin, LimitationOrigin::Wind);
        assert_eq!(parsed.max_raw, POSITION_MAX);
    }

    #[test]
    fn notification_parse_ignores_solicited_frames() {
        let frame = Frame::new(CommandId::CommandSendCfm, vec![0, 1, 0]);
        assert_eq!(Notification::parse(&frame), Ok(None));

        let frame = Frame::new(CommandId::NodeStatePositionChangedNtf, vec![1, 4, 0x64, 0, 0, 0]);
        let parsed = Notification::parse(&frame).unwrap();
        assert!(matches!(
            parsed,
            Some(Notification::PositionChanged(PositionChanged {
                node_id: 1,
                state: NodeState::Executing,
                current_position: 0x6400,
                target_position: 0,
            }))
        ));
    }

    #[test]
    fn error_notification_code() {
        assert_eq!(parse_error_notification(&[7]), HubErrorCode::Busy);
        assert_eq!(parse_error_notification(&[]), HubErrorCode::NotFurtherDefined);
    }
}
