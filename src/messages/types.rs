//! Closed code tables used on the hub wire.
//!
//! Every table decodes with a total `From<raw>` conversion: codes this crate
//! does not know land in an explicit `Unknown` variant instead of being
//! coerced into a neighbouring meaning.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Declares a wire code table with a lossless `Unknown` fallback.
macro_rules! code_table {
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty) {
            $($variant:ident = $value:literal => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant,)+
            Unknown($repr),
        }

        impl From<$repr> for $name {
            fn from(raw: $repr) -> Self {
                match raw {
                    $($value => $name::$variant,)+
                    other => $name::Unknown(other),
                }
            }
        }

        impl From<$name> for $repr {
            fn from(code: $name) -> Self {
                match code {
                    $($name::$variant => $value,)+
                    $name::Unknown(other) => other,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($name::$variant => f.write_str($label),)+
                    $name::Unknown(other) => write!(f, "Unknown ({:#x})", other),
                }
            }
        }
    };
}

code_table! {
    /// Command identifiers of the subset of the gateway API this crate speaks.
    CommandId(u16) {
        ErrorNtf = 0x0000 => "GW_ERROR_NTF",
        GetAllNodesInformationReq = 0x0202 => "GW_GET_ALL_NODES_INFORMATION_REQ",
        GetAllNodesInformationCfm = 0x0203 => "GW_GET_ALL_NODES_INFORMATION_CFM",
        GetAllNodesInformationNtf = 0x0204 => "GW_GET_ALL_NODES_INFORMATION_NTF",
        GetAllNodesInformationFinishedNtf = 0x0205 => "GW_GET_ALL_NODES_INFORMATION_FINISHED_NTF",
        NodeStatePositionChangedNtf = 0x0211 => "GW_NODE_STATE_POSITION_CHANGED_NTF",
        HouseStatusMonitorEnableReq = 0x0240 => "GW_HOUSE_STATUS_MONITOR_ENABLE_REQ",
        HouseStatusMonitorEnableCfm = 0x0241 => "GW_HOUSE_STATUS_MONITOR_ENABLE_CFM",
        CommandSendReq = 0x0300 => "GW_COMMAND_SEND_REQ",
        CommandSendCfm = 0x0301 => "GW_COMMAND_SEND_CFM",
        CommandRunStatusNtf = 0x0302 => "GW_COMMAND_RUN_STATUS_NTF",
        CommandRemainingTimeNtf = 0x0303 => "GW_COMMAND_REMAINING_TIME_NTF",
        SessionFinishedNtf = 0x0304 => "GW_SESSION_FINISHED_NTF",
        GetLimitationStatusReq = 0x0312 => "GW_GET_LIMITATION_STATUS_REQ",
        GetLimitationStatusCfm = 0x0313 => "GW_GET_LIMITATION_STATUS_CFM",
        LimitationStatusNtf = 0x0314 => "GW_LIMITATION_STATUS_NTF",
        PasswordEnterReq = 0x3000 => "GW_PASSWORD_ENTER_REQ",
        PasswordEnterCfm = 0x3001 => "GW_PASSWORD_ENTER_CFM",
    }
}

impl CommandId {
    /// Frames the hub pushes on its own, routed without a waiting caller.
    pub fn is_unsolicited(self) -> bool {
        matches!(
            self,
            CommandId::NodeStatePositionChangedNtf
                | CommandId::CommandRunStatusNtf
                | CommandId::LimitationStatusNtf
        )
    }
}

code_table! {
    /// Device kind as reported in the node descriptor.
    NodeType(u16) {
        InteriorVenetianBlind = 0x0040 => "Interior Venetian Blind",
        RollerShutter = 0x0080 => "Roller Shutter",
        AwningBlind = 0x0081 => "Awning Blind",
        WindowOpener = 0x0101 => "Window Opener",
        GarageOpener = 0x0102 => "Garage Opener",
        Light = 0x0103 => "Light",
        GateLock = 0x0104 => "Gate Lock",
        WindowLock = 0x0105 => "Window Lock",
        VerticalExteriorAwning = 0x0106 => "Vertical Exterior Awning",
        DualShutter = 0x0180 => "Dual Shutter",
        HeatingControl = 0x0200 => "Heating Control",
        OnOffSwitch = 0x0300 => "On/Off Switch",
        HorizontalAwning = 0x0340 => "Horizontal Awning",
        ExteriorVenetianBlind = 0x0380 => "Exterior Venetian Blind",
        LouverBlind = 0x03C0 => "Louver Blind",
        CurtainTrack = 0x0400 => "Curtain Track",
        VentilationPoint = 0x0440 => "Ventilation Point",
        ExteriorHeating = 0x0480 => "Exterior Heating",
        SwingingShutter = 0x0500 => "Swinging Shutter",
    }
}

code_table! {
    /// Execution state of a node.
    NodeState(u8) {
        NonExecuting = 0 => "Non-Executing",
        ErrorWhileExecution = 1 => "Error",
        NotUsed = 2 => "Not Used",
        WaitingForPower = 3 => "Waiting for Power",
        Executing = 4 => "Executing",
        Done = 5 => "Done",
    }
}

code_table! {
    Velocity(u8) {
        Default = 0 => "Default",
        Silent = 1 => "Silent",
        Fast = 2 => "Fast",
        NotAvailable = 255 => "Not Available",
    }
}

code_table! {
    /// Outcome carried by a run-status notification.
    RunStatus(u8) {
        ExecutionCompleted = 0 => "Completed",
        ExecutionFailed = 1 => "Failed",
        ExecutionActive = 2 => "Active",
    }
}

impl RunStatus {
    /// Node state implied by a run outcome, if any.
    pub fn node_state(self) -> Option<NodeState> {
        match self {
            RunStatus::ExecutionCompleted => Some(NodeState::Done),
            RunStatus::ExecutionFailed => Some(NodeState::ErrorWhileExecution),
            RunStatus::ExecutionActive => Some(NodeState::Executing),
            RunStatus::Unknown(_) => None,
        }
    }
}

code_table! {
    /// Reason attached to a run-status notification.
    StatusReply(u8) {
        UnknownStatusReply = 0x00 => "Unknown status reply",
        CommandCompletedOk = 0x01 => "Command completed OK",
        NoContact = 0x02 => "No contact",
        ManuallyOperated = 0x03 => "Manually operated",
        Blocked = 0x04 => "Blocked",
        WrongSystemKey = 0x05 => "Wrong system key",
        PriorityLevelLocked = 0x06 => "Priority level locked",
        ReachedWrongPosition = 0x07 => "Reached wrong position",
        ErrorDuringExecution = 0x08 => "Error during execution",
        NoExecution = 0x09 => "No execution",
        Calibrating = 0x0A => "Calibrating",
        PowerConsumptionTooHigh = 0x0B => "Power consumption too high",
        PowerConsumptionTooLow = 0x0C => "Power consumption too low",
        LockPositionOpen = 0x0D => "Lock position open",
        MotionTimeTooLong = 0x0E => "Motion time too long",
        ThermalProtection = 0x0F => "Thermal protection",
        ProductNotOperational = 0x10 => "Product not operational",
        FilterMaintenanceNeeded = 0x11 => "Filter maintenance needed",
        BatteryLevel = 0x12 => "Battery level",
        TargetModified = 0x13 => "Target modified",
        ModeNotImplemented = 0x14 => "Mode not implemented",
        CommandIncompatibleToMovement = 0x15 => "Command incompatible to movement",
        UserAction = 0x16 => "User action",
        DeadBoltError = 0x17 => "Dead bolt error",
        AutomaticCycleEngaged = 0x18 => "Automatic cycle engaged",
        WrongLoadConnected = 0x19 => "Wrong load connected",
        ColourNotReachable = 0x1A => "Colour not reachable",
        TargetNotReachable = 0x1B => "Target not reachable",
        BadIndexReceived = 0x1C => "Bad index received",
        CommandOverruled = 0x1D => "Command overruled",
        NodeWaitingForPower = 0x1E => "Node waiting for power",
        InformationCode = 0xDF => "Information code",
        ParameterLimited = 0xE0 => "Parameter limited",
        LimitationByLocalUser = 0xE1 => "Limitation by local user",
        LimitationByUser = 0xE2 => "Limitation by user",
        LimitationByRain = 0xE3 => "Limitation by rain",
        LimitationByTimer = 0xE4 => "Limitation by timer",
        LimitationByUps = 0xE6 => "Limitation by UPS",
        LimitationByUnknownDevice = 0xE7 => "Limitation by unknown device",
        LimitationBySaac = 0xEA => "Limitation by SAAC",
        LimitationByWind = 0xEB => "Limitation by wind",
        LimitationByMyself = 0xEC => "Limitation by myself",
        LimitationByAutomaticCycle = 0xED => "Limitation by automatic cycle",
        LimitationByEmergency = 0xEE => "Limitation by emergency",
    }
}

code_table! {
    /// Originator of a limitation, as reported by the limitation query.
    LimitationOrigin(u8) {
        None = 0 => "None",
        User = 1 => "User",
        Rain = 2 => "Rain",
        Timer = 3 => "Timer",
        Ups = 5 => "UPS",
        Saac = 8 => "SAAC",
        Wind = 9 => "Wind",
        LoadShedding = 11 => "Load shedding",
        LocalLight = 12 => "Local light",
        EnvironmentSensor = 13 => "Environment sensor",
        Emergency = 255 => "Emergency",
    }
}

code_table! {
    /// Payload of `GW_ERROR_NTF`.
    HubErrorCode(u8) {
        NotFurtherDefined = 0 => "Not further defined",
        UnknownCommand = 1 => "Unknown command",
        FrameStructure = 2 => "Frame structure error",
        Busy = 7 => "Busy",
        BadSystemTableIndex = 8 => "Bad system table index",
        NotAuthenticated = 12 => "Not authenticated",
    }
}

/// Command priority levels; user commands go out at `UserLevel2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Priority {
    HumanProtection = 0,
    EnvironmentProtection = 1,
    UserLevel1 = 2,
    UserLevel2 = 3,
    ComfortLevel1 = 4,
    ComfortLevel2 = 5,
    ComfortLevel3 = 6,
    ComfortLevel4 = 7,
}

/// Fully open.
pub const POSITION_MIN: u16 = 0x0000;
/// Fully closed (51200).
pub const POSITION_MAX: u16 = 0xC800;
/// Keep the current position; used to stop a moving node.
pub const POSITION_CURRENT: u16 = 0xD100;
/// Move to the node's default position.
pub const POSITION_DEFAULT: u16 = 0xD200;
/// Leave this parameter untouched.
pub const POSITION_IGNORE: u16 = 0xD400;

/// Converts a raw position to percent closed, clamped to `[0, 100]`.
pub fn raw_to_percent(raw: u16) -> f64 {
    if raw >= POSITION_MAX {
        return 100.0;
    }
    f64::from(raw) / f64::from(POSITION_MAX) * 100.0
}

/// Converts percent closed to a raw position, clamping out-of-range input.
pub fn percent_to_raw(percent: f64) -> u16 {
    let percent = if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    };
    (percent / 100.0 * f64::from(POSITION_MAX)).round() as u16
}
