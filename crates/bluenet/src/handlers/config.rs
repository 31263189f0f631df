use bluenet_codec::packets::{state_read_packet, state_write_packet, StateType};
use bluenet_core::ids::config_channel;
use bluenet_core::PeripheralHandle;
use bluenet_transport_ble::{BleScheduler, WriteMode};
use tracing::{debug, info};

use super::{ibeacon_uuid_bytes, request, WireValue};
use crate::error::BluenetError;

const TX_POWER_LEVELS: [i32; 9] = [-40, -30, -20, -16, -12, -8, -4, 0, 4];
const MESH_CHANNELS: [u8; 3] = [37, 38, 39];
const UART_STATES: [u8; 3] = [0, 1, 3];

/// Reads and writes persistent configuration values.
///
/// The characteristic pair used depends on the connection profile detected
/// after connecting: setup or normal mode, v1 or v2 control protocol.
#[derive(Clone)]
pub struct ConfigHandler {
    scheduler: BleScheduler,
}

impl ConfigHandler {
    pub fn new(scheduler: BleScheduler) -> Self {
        Self { scheduler }
    }

    pub async fn write_config(
        &self,
        handle: &PeripheralHandle,
        config: StateType,
        value: &[u8],
    ) -> Result<(), BluenetError> {
        let profile = self.scheduler.profile(handle);
        let channel = config_channel(profile.operation_mode, profile.control_version);
        let packet = state_write_packet(profile.control_version, config, value)?;
        debug!(parent: self.scheduler.span(), %handle, config = config.0, control = channel.control, "writing config");
        self.scheduler
            .write(
                handle,
                channel.service,
                channel.control,
                &packet,
                WriteMode::WithResponse,
            )
            .await?;
        Ok(())
    }

    /// Value bytes of `config`, without any packet header.
    pub async fn read_config(
        &self,
        handle: &PeripheralHandle,
        config: StateType,
    ) -> Result<Vec<u8>, BluenetError> {
        let profile = self.scheduler.profile(handle);
        let version = profile.control_version;
        let channel = config_channel(profile.operation_mode, version);
        let packet = state_read_packet(version, config)?;
        let result = request(&self.scheduler, handle, channel, version, &packet).await?;
        Ok(result.state_value()?.to_vec())
    }

    async fn get<T: WireValue>(
        &self,
        handle: &PeripheralHandle,
        config: StateType,
    ) -> Result<T, BluenetError> {
        let value = self.read_config(handle, config).await?;
        Ok(T::decode(&value)?)
    }

    async fn set<T: WireValue>(
        &self,
        handle: &PeripheralHandle,
        config: StateType,
        value: T,
    ) -> Result<(), BluenetError> {
        self.write_config(handle, config, &value.encode()).await
    }

    /// Accepts only the levels the radio supports: -40, -30, -20, -16, -12,
    /// -8, -4, 0 and 4 dBm.
    pub async fn set_tx_power(&self, handle: &PeripheralHandle, dbm: i32) -> Result<(), BluenetError> {
        if !TX_POWER_LEVELS.contains(&dbm) {
            return Err(BluenetError::InvalidTxPower(dbm));
        }
        let level = i8::try_from(dbm).map_err(|_| BluenetError::InvalidTxPower(dbm))?;
        self.set(handle, StateType::TX_POWER, level).await?;
        info!(parent: self.scheduler.span(), %handle, dbm, "tx power set");
        Ok(())
    }

    pub async fn get_tx_power(&self, handle: &PeripheralHandle) -> Result<i8, BluenetError> {
        self.get(handle, StateType::TX_POWER).await
    }

    pub async fn set_mesh_channel(
        &self,
        handle: &PeripheralHandle,
        channel: u8,
    ) -> Result<(), BluenetError> {
        if !MESH_CHANNELS.contains(&channel) {
            return Err(BluenetError::InvalidInput("mesh channel must be 37, 38 or 39"));
        }
        self.set(handle, StateType::MESH_CHANNEL, channel).await
    }

    pub async fn get_mesh_channel(&self, handle: &PeripheralHandle) -> Result<u8, BluenetError> {
        self.get(handle, StateType::MESH_CHANNEL).await
    }

    /// 0 disables UART, 1 enables it, 3 enables it with extra output.
    pub async fn set_uart_state(&self, handle: &PeripheralHandle, state: u8) -> Result<(), BluenetError> {
        if !UART_STATES.contains(&state) {
            return Err(BluenetError::InvalidInput("uart state must be 0, 1 or 3"));
        }
        self.set(handle, StateType::UART_ENABLED, state).await
    }

    pub async fn set_ibeacon_uuid(&self, handle: &PeripheralHandle, uuid: &str) -> Result<(), BluenetError> {
        let bytes = ibeacon_uuid_bytes(uuid)?;
        self.write_config(handle, StateType::IBEACON_UUID, &bytes).await
    }

    pub async fn set_ibeacon_major(&self, handle: &PeripheralHandle, major: u16) -> Result<(), BluenetError> {
        self.set(handle, StateType::IBEACON_MAJOR, major).await
    }

    pub async fn set_ibeacon_minor(&self, handle: &PeripheralHandle, minor: u16) -> Result<(), BluenetError> {
        self.set(handle, StateType::IBEACON_MINOR, minor).await
    }

    pub async fn set_pwm_period(&self, handle: &PeripheralHandle, period_us: u32) -> Result<(), BluenetError> {
        self.set(handle, StateType::PWM_PERIOD, period_us).await
    }

    pub async fn get_pwm_period(&self, handle: &PeripheralHandle) -> Result<u32, BluenetError> {
        self.get(handle, StateType::PWM_PERIOD).await
    }

    pub async fn set_scan_duration(&self, handle: &PeripheralHandle, ms: u16) -> Result<(), BluenetError> {
        self.set(handle, StateType::SCAN_DURATION, ms).await
    }

    pub async fn set_scan_send_delay(&self, handle: &PeripheralHandle, ms: u16) -> Result<(), BluenetError> {
        self.set(handle, StateType::SCAN_SEND_DELAY, ms).await
    }

    pub async fn set_scan_break_duration(&self, handle: &PeripheralHandle, ms: u16) -> Result<(), BluenetError> {
        self.set(handle, StateType::SCAN_BREAK_DURATION, ms).await
    }

    pub async fn set_scan_filter(&self, handle: &PeripheralHandle, filter: u8) -> Result<(), BluenetError> {
        self.set(handle, StateType::SCAN_FILTER, filter).await
    }

    pub async fn set_scan_filter_fraction(&self, handle: &PeripheralHandle, fraction: u16) -> Result<(), BluenetError> {
        self.set(handle, StateType::SCAN_FILTER_FRACTION, fraction).await
    }

    pub async fn get_max_chip_temp(&self, handle: &PeripheralHandle) -> Result<i8, BluenetError> {
        self.get(handle, StateType::MAX_CHIP_TEMP).await
    }

    pub async fn set_max_chip_temp(&self, handle: &PeripheralHandle, celsius: i8) -> Result<(), BluenetError> {
        self.set(handle, StateType::MAX_CHIP_TEMP, celsius).await
    }

    pub async fn get_dimmer_current_threshold(&self, handle: &PeripheralHandle) -> Result<u16, BluenetError> {
        self.get(handle, StateType::CURRENT_THRESHOLD_DIMMER).await
    }

    pub async fn set_dimmer_current_threshold(&self, handle: &PeripheralHandle, value: u16) -> Result<(), BluenetError> {
        self.set(handle, StateType::CURRENT_THRESHOLD_DIMMER, value).await
    }

    pub async fn get_dimmer_temp_up_threshold(&self, handle: &PeripheralHandle) -> Result<f32, BluenetError> {
        self.get(handle, StateType::DIMMER_TEMP_UP_VOLTAGE).await
    }

    pub async fn set_dimmer_temp_up_threshold(&self, handle: &PeripheralHandle, volts: f32) -> Result<(), BluenetError> {
        self.set(handle, StateType::DIMMER_TEMP_UP_VOLTAGE, volts).await
    }

    pub async fn get_dimmer_temp_down_threshold(&self, handle: &PeripheralHandle) -> Result<f32, BluenetError> {
        self.get(handle, StateType::DIMMER_TEMP_DOWN_VOLTAGE).await
    }

    pub async fn set_dimmer_temp_down_threshold(&self, handle: &PeripheralHandle, volts: f32) -> Result<(), BluenetError> {
        self.set(handle, StateType::DIMMER_TEMP_DOWN_VOLTAGE, volts).await
    }

    pub async fn get_voltage_zero(&self, handle: &PeripheralHandle) -> Result<i32, BluenetError> {
        self.get(handle, StateType::VOLTAGE_ZERO).await
    }

    pub async fn set_voltage_zero(&self, handle: &PeripheralHandle, value: i32) -> Result<(), BluenetError> {
        self.set(handle, StateType::VOLTAGE_ZERO, value).await
    }

    pub async fn get_current_zero(&self, handle: &PeripheralHandle) -> Result<i32, BluenetError> {
        self.get(handle, StateType::CURRENT_ZERO).await
    }

    pub async fn set_current_zero(&self, handle: &PeripheralHandle, value: i32) -> Result<(), BluenetError> {
        self.set(handle, StateType::CURRENT_ZERO, value).await
    }

    pub async fn get_power_zero(&self, handle: &PeripheralHandle) -> Result<i32, BluenetError> {
        self.get(handle, StateType::POWER_ZERO).await
    }

    pub async fn set_power_zero(&self, handle: &PeripheralHandle, value: i32) -> Result<(), BluenetError> {
        self.set(handle, StateType::POWER_ZERO, value).await
    }

    pub async fn get_voltage_multiplier(&self, handle: &PeripheralHandle) -> Result<f32, BluenetError> {
        self.get(handle, StateType::VOLTAGE_MULTIPLIER).await
    }

    pub async fn set_voltage_multiplier(&self, handle: &PeripheralHandle, value: f32) -> Result<(), BluenetError> {
        self.set(handle, StateType::VOLTAGE_MULTIPLIER, value).await
    }

    pub async fn get_current_multiplier(&self, handle: &PeripheralHandle) -> Result<f32, BluenetError> {
        self.get(handle, StateType::CURRENT_MULTIPLIER).await
    }

    pub async fn set_current_multiplier(&self, handle: &PeripheralHandle, value: f32) -> Result<(), BluenetError> {
        self.set(handle, StateType::CURRENT_MULTIPLIER, value).await
    }

    pub async fn get_switchcraft_threshold(&self, handle: &PeripheralHandle) -> Result<f32, BluenetError> {
        self.get(handle, StateType::SWITCHCRAFT_THRESHOLD).await
    }

    pub async fn set_switchcraft_threshold(&self, handle: &PeripheralHandle, value: f32) -> Result<(), BluenetError> {
        self.set(handle, StateType::SWITCHCRAFT_THRESHOLD, value).await
    }

    pub async fn set_switchcraft(&self, handle: &PeripheralHandle, enabled: bool) -> Result<(), BluenetError> {
        self.set(handle, StateType::SWITCHCRAFT_ENABLED, enabled).await
    }

    pub async fn set_tap_to_toggle(&self, handle: &PeripheralHandle, enabled: bool) -> Result<(), BluenetError> {
        self.set(handle, StateType::TAP_TO_TOGGLE_ENABLED, enabled).await
    }

    pub async fn set_tap_to_toggle_threshold(&self, handle: &PeripheralHandle, rssi: i8) -> Result<(), BluenetError> {
        self.set(handle, StateType::TAP_TO_TOGGLE_RSSI_THRESHOLD, rssi).await
    }
}
