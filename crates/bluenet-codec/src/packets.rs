//! Control, state and result packets exchanged over GATT.
//!
//! Protocol v1 uses one byte for command and state types; v2 widens both
//! to 16 bits and wraps state access in `GET_STATE`/`SET_STATE` control
//! commands. All multi-byte fields are little-endian.

use bluenet_core::ControlVersion;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::stepper::DataStepper;

/// Length of the v1 state/config/result header.
pub const V1_HEADER_LEN: usize = 4;
/// Length of the v2 result header.
pub const V2_RESULT_HEADER_LEN: usize = 6;
/// Length of the v2 state header inside a control or result payload.
pub const V2_STATE_HEADER_LEN: usize = 6;

/// Identifier of a config or state value.
///
/// Config values (below 128) and runtime state values share one numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateType(pub u16);

impl StateType {
    pub const PWM_PERIOD: Self = Self(5);
    pub const IBEACON_MAJOR: Self = Self(6);
    pub const IBEACON_MINOR: Self = Self(7);
    pub const IBEACON_UUID: Self = Self(8);
    pub const IBEACON_TX_POWER: Self = Self(9);
    pub const TX_POWER: Self = Self(11);
    pub const ADV_INTERVAL: Self = Self(12);
    pub const SCAN_DURATION: Self = Self(16);
    pub const SCAN_SEND_DELAY: Self = Self(17);
    pub const SCAN_BREAK_DURATION: Self = Self(18);
    pub const MAX_CHIP_TEMP: Self = Self(20);
    pub const SCAN_FILTER: Self = Self(21);
    pub const SCAN_FILTER_FRACTION: Self = Self(22);
    pub const CROWNSTONE_ID: Self = Self(34);
    pub const KEY_ADMIN: Self = Self(35);
    pub const KEY_MEMBER: Self = Self(36);
    pub const KEY_GUEST: Self = Self(37);
    pub const VOLTAGE_MULTIPLIER: Self = Self(43);
    pub const CURRENT_MULTIPLIER: Self = Self(44);
    pub const VOLTAGE_ZERO: Self = Self(45);
    pub const CURRENT_ZERO: Self = Self(46);
    pub const POWER_ZERO: Self = Self(47);
    pub const MESH_ACCESS_ADDRESS: Self = Self(49);
    pub const CURRENT_THRESHOLD_DIMMER: Self = Self(51);
    pub const DIMMER_TEMP_UP_VOLTAGE: Self = Self(52);
    pub const DIMMER_TEMP_DOWN_VOLTAGE: Self = Self(53);
    pub const SWITCHCRAFT_ENABLED: Self = Self(56);
    pub const SWITCHCRAFT_THRESHOLD: Self = Self(57);
    pub const MESH_CHANNEL: Self = Self(58);
    pub const UART_ENABLED: Self = Self(59);
    pub const TAP_TO_TOGGLE_ENABLED: Self = Self(60);
    pub const TAP_TO_TOGGLE_RSSI_THRESHOLD: Self = Self(61);
    pub const SWITCH_STATE: Self = Self(128);
    pub const ACCUMULATED_ENERGY: Self = Self(129);
    pub const POWER_USAGE: Self = Self(130);
    pub const OPERATION_MODE: Self = Self(133);
    pub const TEMPERATURE: Self = Self(134);
    pub const TIME: Self = Self(135);
    pub const ERROR_BITMASK: Self = Self(139);

    /// v1 packets only carry the low byte.
    pub fn v1_code(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

/// Access opcode of v1 state/config packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StateOpCode {
    Read = 0,
    Write = 1,
    Notify = 2,
}

/// Commands written to the control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    Setup,
    FactoryReset,
    GetState,
    SetState,
    Reset,
    GotoDfu,
    NoOperation,
    Disconnect,
    Switch,
    SetTime,
    ResetErrors,
    ValidateSetup,
}

impl ControlCommand {
    /// Wire code for `version`, or `None` when the command does not exist
    /// in that protocol version.
    pub fn code(self, version: ControlVersion) -> Option<u16> {
        match version {
            ControlVersion::V1 => match self {
                Self::Switch => Some(0),
                Self::SetTime => Some(2),
                Self::GotoDfu => Some(3),
                Self::Reset => Some(4),
                Self::FactoryReset => Some(5),
                Self::ValidateSetup => Some(17),
                Self::Disconnect => Some(19),
                Self::NoOperation => Some(21),
                Self::ResetErrors => Some(23),
                Self::Setup | Self::GetState | Self::SetState => None,
            },
            ControlVersion::V2 => match self {
                Self::Setup => Some(0),
                Self::FactoryReset => Some(1),
                Self::GetState => Some(2),
                Self::SetState => Some(3),
                Self::Reset => Some(10),
                Self::GotoDfu => Some(11),
                Self::NoOperation => Some(12),
                Self::Disconnect => Some(13),
                Self::Switch => Some(20),
                Self::SetTime => Some(30),
                Self::ResetErrors => Some(32),
                Self::ValidateSetup => None,
            },
        }
    }
}

/// Result code carried by v2 result packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultValue {
    Success,
    WaitForSuccess,
    SuccessNoChange,
    WrongPayloadLength,
    WrongParameter,
    InvalidMessage,
    UnknownOpCode,
    UnknownType,
    NotFound,
    NoSpace,
    Busy,
    NoAccess,
    NotAvailable,
    NotImplemented,
    WriteDisabled,
    WriteNotAllowed,
    Unspecified,
    Other(u16),
}

impl ResultValue {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::WaitForSuccess,
            2 => Self::SuccessNoChange,
            32 => Self::WrongPayloadLength,
            33 => Self::WrongParameter,
            34 => Self::InvalidMessage,
            35 => Self::UnknownOpCode,
            36 => Self::UnknownType,
            37 => Self::NotFound,
            38 => Self::NoSpace,
            39 => Self::Busy,
            48 => Self::NoAccess,
            64 => Self::NotAvailable,
            65 => Self::NotImplemented,
            80 => Self::WriteDisabled,
            81 => Self::WriteNotAllowed,
            0xFFFF => Self::Unspecified,
            other => Self::Other(other),
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::SuccessNoChange)
    }
}

/// Builds a control packet for `command`.
///
/// v1: `[type u8, reserved u8, length u16, payload]`;
/// v2: `[type u16, length u16, payload]`.
pub fn control_packet(
    version: ControlVersion,
    command: ControlCommand,
    payload: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let code = command
        .code(version)
        .ok_or(CodecError::Unsupported("control command"))?;
    let length = payload_length(payload)?;
    let mut out = Vec::with_capacity(V1_HEADER_LEN + payload.len());
    match version {
        ControlVersion::V1 => {
            out.push((code & 0xFF) as u8);
            out.push(0);
        }
        ControlVersion::V2 => out.extend_from_slice(&code.to_le_bytes()),
    }
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

fn v1_state_packet(opcode: StateOpCode, ty: StateType, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let length = payload_length(payload)?;
    let mut out = Vec::with_capacity(V1_HEADER_LEN + payload.len());
    out.push(ty.v1_code());
    out.push(opcode as u8);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// v2 state header: `[type u16, id u16, persistence u8, reserved u8]`.
fn v2_state_payload(ty: StateType, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(V2_STATE_HEADER_LEN + value.len());
    out.extend_from_slice(&ty.0.to_le_bytes());
    out.extend_from_slice(&0_u16.to_le_bytes());
    out.push(0);
    out.push(0);
    out.extend_from_slice(value);
    out
}

/// Packet asking for the value of `ty`.
pub fn state_read_packet(version: ControlVersion, ty: StateType) -> Result<Vec<u8>, CodecError> {
    match version {
        ControlVersion::V1 => v1_state_packet(StateOpCode::Read, ty, &[]),
        ControlVersion::V2 => control_packet(version, ControlCommand::GetState, &v2_state_payload(ty, &[])),
    }
}

/// Packet setting `ty` to `value`.
pub fn state_write_packet(
    version: ControlVersion,
    ty: StateType,
    value: &[u8],
) -> Result<Vec<u8>, CodecError> {
    match version {
        ControlVersion::V1 => v1_state_packet(StateOpCode::Write, ty, value),
        ControlVersion::V2 => {
            control_packet(version, ControlCommand::SetState, &v2_state_payload(ty, value))
        }
    }
}

/// v1 packet asking the state characteristic to notify the value of `ty`.
pub fn state_notify_packet(ty: StateType) -> Result<Vec<u8>, CodecError> {
    v1_state_packet(StateOpCode::Notify, ty, &[])
}

/// Legacy DFU image-size packet: softdevice, bootloader and application sizes.
pub fn image_size_packet(softdevice: u32, bootloader: u32, application: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    out.extend_from_slice(&softdevice.to_le_bytes());
    out.extend_from_slice(&bootloader.to_le_bytes());
    out.extend_from_slice(&application.to_le_bytes());
    out
}

fn payload_length(payload: &[u8]) -> Result<u16, CodecError> {
    u16::try_from(payload.len()).map_err(|_| CodecError::InvalidDataLength {
        needed: payload.len(),
        remaining: usize::from(u16::MAX),
    })
}

/// Parsed response from a result, config-read or state-read characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPacket {
    pub version: ControlVersion,
    /// v1: the state type byte; v2: the control command it answers.
    pub command_type: u16,
    /// v1: the access opcode; absent in v2.
    pub op_code: Option<u8>,
    pub result: ResultValue,
    pub payload: Vec<u8>,
}

impl ResultPacket {
    pub fn parse(version: ControlVersion, data: &[u8]) -> Result<Self, CodecError> {
        match version {
            ControlVersion::V1 => Self::parse_v1(data),
            ControlVersion::V2 => Self::parse_v2(data),
        }
    }

    /// `[type u8, opcode u8, length u16, payload]`.
    pub fn parse_v1(data: &[u8]) -> Result<Self, CodecError> {
        let mut s = DataStepper::new(data);
        let header = (s.u8(), s.u8(), s.u16());
        let (ty, op_code, length) = match header {
            (Ok(ty), Ok(op), Ok(len)) => (ty, op, len),
            _ => {
                return Err(CodecError::IncorrectResponseLength {
                    expected: V1_HEADER_LEN,
                    actual: data.len(),
                })
            }
        };
        let payload = s.take(usize::from(length)).map_err(|_| {
            CodecError::IncorrectResponseLength {
                expected: V1_HEADER_LEN + usize::from(length),
                actual: data.len(),
            }
        })?;
        Ok(Self {
            version: ControlVersion::V1,
            command_type: u16::from(ty),
            op_code: Some(op_code),
            result: ResultValue::Unspecified,
            payload: payload.to_vec(),
        })
    }

    /// `[command type u16, result code u16, size u16, payload]`.
    pub fn parse_v2(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < V2_RESULT_HEADER_LEN {
            return Err(CodecError::IncorrectResponseLength {
                expected: V2_RESULT_HEADER_LEN,
                actual: data.len(),
            });
        }
        let mut s = DataStepper::new(data);
        let command_type = s.u16()?;
        let result = ResultValue::from_code(s.u16()?);
        let size = s.u16()?;
        let payload = s.take(usize::from(size)).map_err(|_| {
            CodecError::IncorrectResponseLength {
                expected: V2_RESULT_HEADER_LEN + usize::from(size),
                actual: data.len(),
            }
        })?;
        Ok(Self {
            version: ControlVersion::V2,
            command_type,
            op_code: None,
            result,
            payload: payload.to_vec(),
        })
    }

    /// Value bytes of a state read, without the v2 state header.
    pub fn state_value(&self) -> Result<&[u8], CodecError> {
        match self.version {
            ControlVersion::V1 => Ok(&self.payload),
            ControlVersion::V2 => {
                self.payload
                    .get(V2_STATE_HEADER_LEN..)
                    .ok_or(CodecError::IncorrectResponseLength {
                        expected: V2_STATE_HEADER_LEN,
                        actual: self.payload.len(),
                    })
            }
        }
    }
}
