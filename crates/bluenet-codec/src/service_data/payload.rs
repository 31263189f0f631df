//! Per-opcode service-data layouts.
//!
//! Each variant carries only the fields its layout defines. All layouts
//! read from the 16-byte block that follows the opcode (and device-type)
//! header, after decryption when a key was supplied.

use bluenet_core::bitmask::bit_u8;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CodecError;
use crate::stepper::DataStepper;

/// Length of the (possibly encrypted) service-data block.
pub const BLOCK_LEN: usize = 16;

/// Marker byte closing state layouts that carry a validation field.
pub const VALIDATION_MARKER: u8 = 0xFA;

/// Generic flags byte shared by the opcode 3..7 layouts, bit 0 first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFlags {
    pub dimmer_ready: bool,
    pub dimming_allowed: bool,
    pub has_error: bool,
    pub switch_locked: bool,
    pub time_set: bool,
    pub switchcraft_enabled: bool,
    pub tap_to_toggle_enabled: bool,
    pub behaviour_overridden: bool,
}

impl StateFlags {
    pub fn from_byte(value: u8) -> Self {
        Self {
            dimmer_ready: bit_u8(value, 0),
            dimming_allowed: bit_u8(value, 1),
            has_error: bit_u8(value, 2),
            switch_locked: bit_u8(value, 3),
            time_set: bit_u8(value, 4),
            switchcraft_enabled: bit_u8(value, 5),
            tap_to_toggle_enabled: bit_u8(value, 6),
            behaviour_overridden: bit_u8(value, 7),
        }
    }
}

/// Flags byte of the opcode 1/2 layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyFlags {
    pub new_data_available: bool,
    pub state_of_external_crownstone: bool,
    pub has_error: bool,
    pub setup_mode: bool,
}

impl LegacyFlags {
    pub fn from_byte(value: u8) -> Self {
        Self {
            new_data_available: bit_u8(value, 0),
            state_of_external_crownstone: bit_u8(value, 1),
            has_error: bit_u8(value, 2),
            setup_mode: bit_u8(value, 7),
        }
    }
}

/// Flags byte of the hub state layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubFlags {
    pub uart_alive: bool,
    pub uart_alive_encrypted: bool,
    pub uart_encryption_required_by_crownstone: bool,
    pub uart_encryption_required_by_hub: bool,
    pub hub_has_been_setup: bool,
    pub hub_has_internet: bool,
    pub hub_has_error: bool,
}

impl HubFlags {
    pub fn from_byte(value: u8) -> Self {
        Self {
            uart_alive: bit_u8(value, 0),
            uart_alive_encrypted: bit_u8(value, 1),
            uart_encryption_required_by_crownstone: bit_u8(value, 2),
            uart_encryption_required_by_hub: bit_u8(value, 3),
            hub_has_been_setup: bit_u8(value, 4),
            hub_has_internet: bit_u8(value, 5),
            hub_has_error: bit_u8(value, 6),
        }
    }
}

/// Opcode 1/2: the pre-encryption-era layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyState {
    pub crownstone_id: u16,
    pub switch_state: u8,
    pub flags_bitmask: u8,
    pub flags: LegacyFlags,
    pub temperature: i8,
    /// Milliwatts.
    pub power_usage: i32,
    pub accumulated_energy: i32,
    pub random: [u8; 3],
}

/// Opcode 3/5/7 type 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePacket {
    pub crownstone_id: u8,
    pub switch_state: u8,
    pub flags_bitmask: u8,
    pub flags: StateFlags,
    pub temperature: i8,
    pub power_factor_raw: i8,
    /// Eighths of a watt.
    pub power_usage_raw: i16,
    pub accumulated_energy: i32,
    pub partial_timestamp: u16,
    pub extra_flags: u8,
    pub validation: u8,
}

/// Opcode 3/5/7 type 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPacket {
    pub crownstone_id: u8,
    pub errors_bitmask: u32,
    pub error_timestamp: u32,
    pub flags_bitmask: u8,
    pub flags: StateFlags,
    pub temperature: i8,
    pub partial_timestamp: u16,
    pub power_usage_raw: i16,
}

/// Opcode 3/5/7 type 2: a neighbour's state relayed over the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalStatePacket {
    pub crownstone_id: u8,
    pub switch_state: u8,
    pub flags_bitmask: u8,
    pub flags: StateFlags,
    pub temperature: i8,
    pub power_factor_raw: i8,
    pub power_usage_raw: i16,
    pub accumulated_energy: i32,
    pub partial_timestamp: u16,
    pub rssi: i8,
    pub validation: u8,
}

/// Opcode 3/5/7 type 3: a neighbour's error state relayed over the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalErrorPacket {
    pub crownstone_id: u8,
    pub errors_bitmask: u32,
    pub error_timestamp: u32,
    pub flags_bitmask: u8,
    pub flags: StateFlags,
    pub temperature: i8,
    pub partial_timestamp: u16,
    pub rssi: i8,
    pub validation: u8,
}

/// Opcode 5/7 type 4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeStatePacket {
    pub crownstone_id: u8,
    pub switch_state: u8,
    pub flags_bitmask: u8,
    pub flags: StateFlags,
    pub behaviour_master_hash: u16,
    pub asset_filters_master_version: u16,
    pub asset_filters_crc: u32,
    pub partial_timestamp: u16,
    pub validation: u8,
}

/// Opcode 5/7 type 5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubStatePacket {
    pub crownstone_id: u8,
    pub hub_flags_bitmask: u8,
    pub hub_flags: HubFlags,
    pub hub_data: [u8; 9],
    pub partial_timestamp: u16,
    pub validation: u8,
}

/// Opcode 4/6: broadcast while the Crownstone waits for setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupPacket {
    pub switch_state: u8,
    pub flags_bitmask: u8,
    pub flags: StateFlags,
    pub temperature: i8,
    pub power_factor_raw: i8,
    pub power_usage_raw: i16,
    pub errors_bitmask: u32,
    pub counter: u8,
}

/// Decoded service-data block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "camelCase")]
pub enum ServiceDataPayload {
    Legacy(LegacyState),
    State(StatePacket),
    Error(ErrorPacket),
    ExternalState(ExternalStatePacket),
    ExternalError(ExternalErrorPacket),
    AlternativeState(AlternativeStatePacket),
    HubState(HubStatePacket),
    Setup(SetupPacket),
}

impl ServiceDataPayload {
    /// Decodes `block` according to `op_code`.
    ///
    /// Returns `Ok(None)` for opcodes this library does not know.
    pub fn decode(op_code: u8, block: &[u8]) -> Result<Option<Self>, CodecError> {
        if block.len() != BLOCK_LEN {
            return Err(CodecError::InvalidDataLength {
                needed: BLOCK_LEN,
                remaining: block.len(),
            });
        }
        let data_type = block[0];
        let payload = match op_code {
            1 | 2 => Self::Legacy(decode_legacy(block)?),
            3 => match data_type {
                0 => Self::State(decode_state(block)?),
                1 => Self::Error(decode_error(block)?),
                2 => Self::ExternalState(decode_external_state(block)?),
                3 => Self::ExternalError(decode_external_error(block)?),
                other => {
                    warn!(op_code, data_type = other, "unknown service data type, using state layout");
                    Self::State(decode_state(block)?)
                }
            },
            5 | 7 => match data_type {
                0 => Self::State(decode_state(block)?),
                1 => Self::Error(decode_error(block)?),
                2 => Self::ExternalState(decode_external_state(block)?),
                3 => Self::ExternalError(decode_external_error(block)?),
                4 => Self::AlternativeState(decode_alternative_state(block)?),
                5 => Self::HubState(decode_hub_state(block)?),
                other => {
                    warn!(op_code, data_type = other, "unknown service data type, using state layout");
                    Self::State(decode_state(block)?)
                }
            },
            4 | 6 => {
                if data_type != 0 {
                    warn!(op_code, data_type, "unknown setup data type, using setup layout");
                }
                Self::Setup(decode_setup(block)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(payload))
    }

    pub fn partial_timestamp(&self) -> Option<u16> {
        match self {
            Self::Legacy(_) | Self::Setup(_) => None,
            Self::State(p) => Some(p.partial_timestamp),
            Self::Error(p) => Some(p.partial_timestamp),
            Self::ExternalState(p) => Some(p.partial_timestamp),
            Self::ExternalError(p) => Some(p.partial_timestamp),
            Self::AlternativeState(p) => Some(p.partial_timestamp),
            Self::HubState(p) => Some(p.partial_timestamp),
        }
    }

    pub fn flags(&self) -> Option<StateFlags> {
        match self {
            Self::Legacy(_) | Self::HubState(_) => None,
            Self::State(p) => Some(p.flags),
            Self::Error(p) => Some(p.flags),
            Self::ExternalState(p) => Some(p.flags),
            Self::ExternalError(p) => Some(p.flags),
            Self::AlternativeState(p) => Some(p.flags),
            Self::Setup(p) => Some(p.flags),
        }
    }
}

fn decode_legacy(block: &[u8]) -> Result<LegacyState, CodecError> {
    let mut s = DataStepper::new(block);
    let crownstone_id = s.u16()?;
    let switch_state = s.u8()?;
    let flags_bitmask = s.u8()?;
    let temperature = s.i8()?;
    let power_usage = s.i32()?;
    let accumulated_energy = s.i32()?;
    let mut random = [0_u8; 3];
    random.copy_from_slice(s.take(3)?);
    Ok(LegacyState {
        crownstone_id,
        switch_state,
        flags_bitmask,
        flags: LegacyFlags::from_byte(flags_bitmask),
        temperature,
        power_usage,
        accumulated_energy,
        random,
    })
}

fn decode_state(block: &[u8]) -> Result<StatePacket, CodecError> {
    let mut s = DataStepper::new(block);
    s.skip(1)?;
    let crownstone_id = s.u8()?;
    let switch_state = s.u8()?;
    let flags_bitmask = s.u8()?;
    Ok(StatePacket {
        crownstone_id,
        switch_state,
        flags_bitmask,
        flags: StateFlags::from_byte(flags_bitmask),
        temperature: s.i8()?,
        power_factor_raw: s.i8()?,
        power_usage_raw: s.i16()?,
        accumulated_energy: s.i32()?,
        partial_timestamp: s.u16()?,
        extra_flags: s.u8()?,
        validation: s.u8()?,
    })
}

fn decode_error(block: &[u8]) -> Result<ErrorPacket, CodecError> {
    let mut s = DataStepper::new(block);
    s.skip(1)?;
    let crownstone_id = s.u8()?;
    let errors_bitmask = s.u32()?;
    let error_timestamp = s.u32()?;
    let flags_bitmask = s.u8()?;
    Ok(ErrorPacket {
        crownstone_id,
        errors_bitmask,
        error_timestamp,
        flags_bitmask,
        flags: StateFlags::from_byte(flags_bitmask),
        temperature: s.i8()?,
        partial_timestamp: s.u16()?,
        power_usage_raw: s.i16()?,
    })
}

fn decode_external_state(block: &[u8]) -> Result<ExternalStatePacket, CodecError> {
    let mut s = DataStepper::new(block);
    s.skip(1)?;
    let crownstone_id = s.u8()?;
    let switch_state = s.u8()?;
    let flags_bitmask = s.u8()?;
    Ok(ExternalStatePacket {
        crownstone_id,
        switch_state,
        flags_bitmask,
        flags: StateFlags::from_byte(flags_bitmask),
        temperature: s.i8()?,
        power_factor_raw: s.i8()?,
        power_usage_raw: s.i16()?,
        accumulated_energy: s.i32()?,
        partial_timestamp: s.u16()?,
        rssi: s.i8()?,
        validation: s.u8()?,
    })
}

fn decode_external_error(block: &[u8]) -> Result<ExternalErrorPacket, CodecError> {
    let mut s = DataStepper::new(block);
    s.skip(1)?;
    let crownstone_id = s.u8()?;
    let errors_bitmask = s.u32()?;
    let error_timestamp = s.u32()?;
    let flags_bitmask = s.u8()?;
    Ok(ExternalErrorPacket {
        crownstone_id,
        errors_bitmask,
        error_timestamp,
        flags_bitmask,
        flags: StateFlags::from_byte(flags_bitmask),
        temperature: s.i8()?,
        partial_timestamp: s.u16()?,
        rssi: s.i8()?,
        validation: s.u8()?,
    })
}

fn decode_alternative_state(block: &[u8]) -> Result<AlternativeStatePacket, CodecError> {
    let mut s = DataStepper::new(block);
    s.skip(1)?;
    let crownstone_id = s.u8()?;
    let switch_state = s.u8()?;
    let flags_bitmask = s.u8()?;
    let behaviour_master_hash = s.u16()?;
    let asset_filters_master_version = s.u16()?;
    let asset_filters_crc = s.u32()?;
    let partial_timestamp = s.u16()?;
    s.skip(1)?;
    Ok(AlternativeStatePacket {
        crownstone_id,
        switch_state,
        flags_bitmask,
        flags: StateFlags::from_byte(flags_bitmask),
        behaviour_master_hash,
        asset_filters_master_version,
        asset_filters_crc,
        partial_timestamp,
        validation: s.u8()?,
    })
}

fn decode_hub_state(block: &[u8]) -> Result<HubStatePacket, CodecError> {
    let mut s = DataStepper::new(block);
    s.skip(1)?;
    let crownstone_id = s.u8()?;
    let hub_flags_bitmask = s.u8()?;
    let mut hub_data = [0_u8; 9];
    hub_data.copy_from_slice(s.take(9)?);
    let partial_timestamp = s.u16()?;
    s.skip(1)?;
    Ok(HubStatePacket {
        crownstone_id,
        hub_flags_bitmask,
        hub_flags: HubFlags::from_byte(hub_flags_bitmask),
        hub_data,
        partial_timestamp,
        validation: s.u8()?,
    })
}

fn decode_setup(block: &[u8]) -> Result<SetupPacket, CodecError> {
    let mut s = DataStepper::new(block);
    s.skip(1)?;
    let switch_state = s.u8()?;
    let flags_bitmask = s.u8()?;
    Ok(SetupPacket {
        switch_state,
        flags_bitmask,
        flags: StateFlags::from_byte(flags_bitmask),
        temperature: s.i8()?,
        power_factor_raw: s.i8()?,
        power_usage_raw: s.i16()?,
        errors_bitmask: s.u32()?,
        counter: s.u8()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_block() -> [u8; BLOCK_LEN] {
        [
            0x00, 0x05, 0x64, 0b0001_0011, 0xF4, 0x7F, 0x40, 0x01, 0x10, 0x27, 0x00, 0x00, 0xE8,
            0x03, 0x00, VALIDATION_MARKER,
        ]
    }

    #[test]
    fn flags_follow_bit_order() {
        let flags = StateFlags::from_byte(0b1010_0101);
        assert!(flags.dimmer_ready);
        assert!(!flags.dimming_allowed);
        assert!(flags.has_error);
        assert!(!flags.switch_locked);
        assert!(!flags.time_set);
        assert!(flags.switchcraft_enabled);
        assert!(!flags.tap_to_toggle_enabled);
        assert!(flags.behaviour_overridden);
    }

    #[test]
    fn opcode3_type0_fields() {
        let payload = ServiceDataPayload::decode(3, &state_block()).unwrap().unwrap();
        let ServiceDataPayload::State(state) = payload else {
            panic!("expected state layout");
        };
        assert_eq!(state.crownstone_id, 5);
        assert_eq!(state.switch_state, 100);
        assert!(state.flags.dimmer_ready && state.flags.dimming_allowed && state.flags.time_set);
        assert_eq!(state.temperature, -12);
        assert_eq!(state.power_factor_raw, 127);
        assert_eq!(state.power_usage_raw, 320);
        assert_eq!(state.accumulated_energy, 10_000);
        assert_eq!(state.partial_timestamp, 1000);
        assert_eq!(state.validation, VALIDATION_MARKER);
    }

    #[test]
    fn unknown_type_falls_back_to_state_layout() {
        let mut block = state_block();
        block[0] = 9;
        let payload = ServiceDataPayload::decode(3, &block).unwrap().unwrap();
        assert!(matches!(payload, ServiceDataPayload::State(ref s) if s.crownstone_id == 5));

        // type 4 is only defined for opcodes 5 and 7
        block[0] = 4;
        let payload = ServiceDataPayload::decode(3, &block).unwrap().unwrap();
        assert!(matches!(payload, ServiceDataPayload::State(_)));
        let payload = ServiceDataPayload::decode(5, &block).unwrap().unwrap();
        assert!(matches!(payload, ServiceDataPayload::AlternativeState(_)));
    }

    #[test]
    fn error_layout_reads_error_fields() {
        let block = [
            0x01, 0x07, 0x05, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x04, 0x19, 0x02, 0x00,
            0x08, 0x00,
        ];
        let payload = ServiceDataPayload::decode(3, &block).unwrap().unwrap();
        let ServiceDataPayload::Error(error) = payload else {
            panic!("expected error layout");
        };
        assert_eq!(error.crownstone_id, 7);
        assert_eq!(error.errors_bitmask, 0b101);
        assert_eq!(error.error_timestamp, 16);
        assert!(error.flags.has_error);
        assert_eq!(error.temperature, 25);
        assert_eq!(error.partial_timestamp, 2);
        assert_eq!(error.power_usage_raw, 8);
    }

    #[test]
    fn hub_state_layout() {
        let mut block = [0_u8; BLOCK_LEN];
        block[0] = 5;
        block[1] = 12;
        block[2] = 0b0110_0001;
        block[3..12].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        block[12] = 0x34;
        block[13] = 0x12;
        block[15] = VALIDATION_MARKER;
        let payload = ServiceDataPayload::decode(7, &block).unwrap().unwrap();
        let ServiceDataPayload::HubState(hub) = payload else {
            panic!("expected hub layout");
        };
        assert_eq!(hub.crownstone_id, 12);
        assert!(hub.hub_flags.uart_alive);
        assert!(hub.hub_flags.hub_has_internet);
        assert!(hub.hub_flags.hub_has_error);
        assert!(!hub.hub_flags.hub_has_been_setup);
        assert_eq!(hub.hub_data, [1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(hub.partial_timestamp, 0x1234);
    }

    #[test]
    fn legacy_layout_reads_u16_id() {
        let block = [
            0x34, 0x12, 0x01, 0b1000_0100, 0x16, 0xE8, 0x03, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00,
            0xAA, 0xBB, 0xCC,
        ];
        let payload = ServiceDataPayload::decode(1, &block).unwrap().unwrap();
        let ServiceDataPayload::Legacy(legacy) = payload else {
            panic!("expected legacy layout");
        };
        assert_eq!(legacy.crownstone_id, 0x1234);
        assert!(legacy.flags.has_error);
        assert!(legacy.flags.setup_mode);
        assert_eq!(legacy.temperature, 22);
        assert_eq!(legacy.power_usage, 1000);
        assert_eq!(legacy.accumulated_energy, 10);
        assert_eq!(legacy.random, [0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn unknown_opcode_yields_nothing() {
        assert_eq!(ServiceDataPayload::decode(9, &state_block()), Ok(None));
    }

    #[test]
    fn short_block_is_rejected() {
        assert!(ServiceDataPayload::decode(3, &[0_u8; 4]).is_err());
    }
}
