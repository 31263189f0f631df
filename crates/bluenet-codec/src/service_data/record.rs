//! Unified service-data record.

use bluenet_core::{CrownstoneErrors, DeviceType};
use serde::{Deserialize, Serialize};

use super::payload::{ServiceDataPayload, StateFlags, VALIDATION_MARKER};
use super::timestamp::{reconstruct_timestamp, Timestamp};

/// Lower bound on the magnitude of a derived power factor.
const MIN_POWER_FACTOR: f64 = 0.01;

/// Mode a Crownstone advertises itself in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrownstoneMode {
    Operation,
    Setup,
    Dfu,
    #[default]
    Unknown,
}

/// Device state reconstructed from one advertisement frame.
///
/// Only trust the fields when `data_ready_for_use` is set. A frame that
/// failed validation or decryption keeps every field at its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDataRecord {
    pub op_code: u8,
    pub data_type: u8,
    pub device_type: DeviceType,
    pub mode: CrownstoneMode,
    pub crownstone_id: u16,
    pub switch_state: u8,
    pub flags_bitmask: u8,
    pub dimmer_ready: bool,
    pub dimming_allowed: bool,
    pub has_error: bool,
    pub switch_locked: bool,
    pub time_set: bool,
    pub switchcraft_enabled: bool,
    pub tap_to_toggle_enabled: bool,
    pub behaviour_overridden: bool,
    /// False while a manual switch overrides the behaviour rules.
    pub behaviour_enabled: bool,
    pub temperature: i8,
    pub power_factor: f64,
    pub power_usage_real: f64,
    pub power_usage_apparent: f64,
    pub accumulated_energy: i64,
    pub partial_timestamp: u16,
    pub timestamp: Option<Timestamp>,
    pub extra_flags: u8,
    pub validation: u8,
    pub errors_bitmask: u32,
    pub errors: CrownstoneErrors,
    pub error_timestamp: u32,
    pub error_mode: bool,
    pub state_of_external_crownstone: bool,
    pub rssi_of_external_crownstone: i8,
    pub alternative_state: bool,
    pub behaviour_master_hash: u16,
    pub asset_filters_master_version: u16,
    pub asset_filters_crc: u32,
    pub hub_mode: bool,
    pub hub_flags_bitmask: u8,
    pub hub_data: Vec<u8>,
    pub setup_mode: bool,
    pub unique_identifier: u32,
    /// Set when the layout's validation marker matched.
    pub valid_data: bool,
    pub data_ready_for_use: bool,
    pub payload: Option<ServiceDataPayload>,
}

impl Default for ServiceDataRecord {
    fn default() -> Self {
        Self {
            op_code: 0,
            data_type: 0,
            device_type: DeviceType::Unset,
            mode: CrownstoneMode::Unknown,
            crownstone_id: 0,
            switch_state: 0,
            flags_bitmask: 0,
            dimmer_ready: false,
            dimming_allowed: false,
            has_error: false,
            switch_locked: false,
            time_set: false,
            switchcraft_enabled: false,
            tap_to_toggle_enabled: false,
            behaviour_overridden: false,
            behaviour_enabled: true,
            temperature: 0,
            power_factor: 1.0,
            power_usage_real: 0.0,
            power_usage_apparent: 0.0,
            accumulated_energy: 0,
            partial_timestamp: 0,
            timestamp: None,
            extra_flags: 0,
            validation: 0,
            errors_bitmask: 0,
            errors: CrownstoneErrors::default(),
            error_timestamp: 0,
            error_mode: false,
            state_of_external_crownstone: false,
            rssi_of_external_crownstone: 0,
            alternative_state: false,
            behaviour_master_hash: 0,
            asset_filters_master_version: 0,
            asset_filters_crc: 0,
            hub_mode: false,
            hub_flags_bitmask: 0,
            hub_data: Vec::new(),
            setup_mode: false,
            unique_identifier: 0,
            valid_data: false,
            data_ready_for_use: false,
            payload: None,
        }
    }
}

/// Maps a raw signed power-factor byte onto `[-1, 1]`, never exactly zero.
pub fn power_factor_from_raw(raw: i8) -> f64 {
    let factor = f64::from(raw) / 127.0;
    if factor.abs() < MIN_POWER_FACTOR {
        if factor < 0.0 {
            -MIN_POWER_FACTOR
        } else {
            MIN_POWER_FACTOR
        }
    } else {
        factor
    }
}

impl ServiceDataRecord {
    /// Hex form of `unique_identifier`, used to tell repeated frames apart.
    pub fn unique_element(&self) -> String {
        self.unique_identifier
            .to_le_bytes()
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect()
    }

    pub fn is_setup_mode(&self) -> bool {
        self.mode == CrownstoneMode::Setup
    }

    /// Copies the fields of `payload` into the record.
    ///
    /// `reference` is the observer clock (seconds, UTC offset applied)
    /// used to rebuild partial timestamps.
    pub(crate) fn project(&mut self, payload: ServiceDataPayload, reference: i64) {
        match &payload {
            ServiceDataPayload::Legacy(p) => {
                self.crownstone_id = p.crownstone_id;
                self.switch_state = p.switch_state;
                self.flags_bitmask = p.flags_bitmask;
                self.has_error = p.flags.has_error;
                self.state_of_external_crownstone = p.flags.state_of_external_crownstone;
                self.setup_mode = p.flags.setup_mode && p.crownstone_id == 0;
                self.temperature = p.temperature;
                self.power_factor = 1.0;
                self.power_usage_real = f64::from(p.power_usage) / 1000.0;
                self.power_usage_apparent = self.power_usage_real;
                self.accumulated_energy = i64::from(p.accumulated_energy);
                self.unique_identifier = u32::from_le_bytes([p.random[0], p.random[1], p.random[2], 0]);
                self.valid_data = true;
            }
            ServiceDataPayload::State(p) => {
                self.data_type = 0;
                self.crownstone_id = u16::from(p.crownstone_id);
                self.switch_state = p.switch_state;
                self.apply_flags(p.flags_bitmask, p.flags);
                self.temperature = p.temperature;
                self.apply_power(p.power_factor_raw, p.power_usage_raw);
                self.accumulated_energy = i64::from(p.accumulated_energy);
                self.extra_flags = p.extra_flags;
                self.apply_timestamp(p.partial_timestamp, reference);
                self.apply_validation(p.validation);
            }
            ServiceDataPayload::Error(p) => {
                self.data_type = 1;
                self.error_mode = true;
                self.crownstone_id = u16::from(p.crownstone_id);
                self.apply_errors(p.errors_bitmask);
                self.error_timestamp = p.error_timestamp;
                self.apply_flags(p.flags_bitmask, p.flags);
                self.temperature = p.temperature;
                self.apply_power(127, p.power_usage_raw);
                self.apply_timestamp(p.partial_timestamp, reference);
                // this layout has no room for a validation byte
                self.valid_data = true;
            }
            ServiceDataPayload::ExternalState(p) => {
                self.data_type = 2;
                self.state_of_external_crownstone = true;
                self.crownstone_id = u16::from(p.crownstone_id);
                self.switch_state = p.switch_state;
                self.apply_flags(p.flags_bitmask, p.flags);
                self.temperature = p.temperature;
                self.apply_power(p.power_factor_raw, p.power_usage_raw);
                self.accumulated_energy = i64::from(p.accumulated_energy);
                self.rssi_of_external_crownstone = p.rssi;
                self.apply_timestamp(p.partial_timestamp, reference);
                self.apply_validation(p.validation);
            }
            ServiceDataPayload::ExternalError(p) => {
                self.data_type = 3;
                self.error_mode = true;
                self.state_of_external_crownstone = true;
                self.crownstone_id = u16::from(p.crownstone_id);
                self.apply_errors(p.errors_bitmask);
                self.error_timestamp = p.error_timestamp;
                self.apply_flags(p.flags_bitmask, p.flags);
                self.temperature = p.temperature;
                self.rssi_of_external_crownstone = p.rssi;
                self.apply_timestamp(p.partial_timestamp, reference);
                self.apply_validation(p.validation);
            }
            ServiceDataPayload::AlternativeState(p) => {
                self.data_type = 4;
                self.alternative_state = true;
                self.crownstone_id = u16::from(p.crownstone_id);
                self.switch_state = p.switch_state;
                self.apply_flags(p.flags_bitmask, p.flags);
                self.behaviour_master_hash = p.behaviour_master_hash;
                self.asset_filters_master_version = p.asset_filters_master_version;
                self.asset_filters_crc = p.asset_filters_crc;
                self.apply_timestamp(p.partial_timestamp, reference);
                self.apply_validation(p.validation);
            }
            ServiceDataPayload::HubState(p) => {
                self.data_type = 5;
                self.hub_mode = true;
                self.crownstone_id = u16::from(p.crownstone_id);
                self.hub_flags_bitmask = p.hub_flags_bitmask;
                self.has_error = p.hub_flags.hub_has_error;
                self.hub_data = p.hub_data.to_vec();
                // hub frames carry no time-set flag; their clock follows the hub's
                self.timestamp = Some(Timestamp::Reconstructed(reconstruct_timestamp(
                    reference,
                    p.partial_timestamp,
                )));
                self.partial_timestamp = p.partial_timestamp;
                self.unique_identifier = u32::from(p.partial_timestamp);
                self.apply_validation(p.validation);
            }
            ServiceDataPayload::Setup(p) => {
                self.setup_mode = true;
                self.switch_state = p.switch_state;
                self.apply_flags(p.flags_bitmask, p.flags);
                self.temperature = p.temperature;
                self.apply_power(p.power_factor_raw, p.power_usage_raw);
                self.apply_errors(p.errors_bitmask);
                self.unique_identifier = u32::from(p.counter);
                self.valid_data = true;
            }
        }
        self.payload = Some(payload);
        self.data_ready_for_use = true;
    }

    fn apply_flags(&mut self, bitmask: u8, flags: StateFlags) {
        self.flags_bitmask = bitmask;
        self.dimmer_ready = flags.dimmer_ready;
        self.dimming_allowed = flags.dimming_allowed;
        self.has_error = flags.has_error;
        self.switch_locked = flags.switch_locked;
        self.time_set = flags.time_set;
        self.switchcraft_enabled = flags.switchcraft_enabled;
        self.tap_to_toggle_enabled = flags.tap_to_toggle_enabled;
        self.behaviour_overridden = flags.behaviour_overridden;
        self.behaviour_enabled = !flags.behaviour_overridden;
    }

    fn apply_power(&mut self, power_factor_raw: i8, power_usage_raw: i16) {
        self.power_factor = power_factor_from_raw(power_factor_raw);
        self.power_usage_real = f64::from(power_usage_raw) / 8.0;
        self.power_usage_apparent = self.power_usage_real / self.power_factor;
    }

    fn apply_errors(&mut self, bitmask: u32) {
        self.errors_bitmask = bitmask;
        self.errors = CrownstoneErrors::from_bitmask(bitmask);
    }

    fn apply_timestamp(&mut self, partial: u16, reference: i64) {
        self.partial_timestamp = partial;
        self.unique_identifier = u32::from(partial);
        self.timestamp = Some(if self.time_set {
            Timestamp::Reconstructed(reconstruct_timestamp(reference, partial))
        } else {
            Timestamp::Counter(partial)
        });
    }

    fn apply_validation(&mut self, validation: u8) {
        self.validation = validation;
        self.valid_data = validation == VALIDATION_MARKER;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_factor_is_never_zero() {
        assert_eq!(power_factor_from_raw(0), MIN_POWER_FACTOR);
        assert_eq!(power_factor_from_raw(127), 1.0);
        assert_eq!(power_factor_from_raw(-127), -1.0);
        assert!((power_factor_from_raw(64) - 64.0 / 127.0).abs() < 1e-12);
        assert!(power_factor_from_raw(1).abs() >= MIN_POWER_FACTOR);
    }

    #[test]
    fn default_record_is_not_ready() {
        let record = ServiceDataRecord::default();
        assert!(!record.data_ready_for_use);
        assert!(!record.valid_data);
        assert_eq!(record.power_factor, 1.0);
        assert!(record.behaviour_enabled);
        assert!(record.payload.is_none());
    }

    #[test]
    fn unique_element_is_little_endian_hex() {
        let record = ServiceDataRecord {
            unique_identifier: 1000,
            ..ServiceDataRecord::default()
        };
        assert_eq!(record.unique_element(), "E8030000");
    }
}
