use bluenet_codec::packets::{state_notify_packet, state_read_packet, StateType};
use bluenet_core::ids::state_channel;
use bluenet_core::{ControlVersion, CrownstoneErrors, PeripheralHandle};
use bluenet_transport_ble::BleScheduler;
use tracing::debug;

use super::{request, WireValue};
use crate::error::BluenetError;

/// Reads runtime state values from a connected Crownstone.
#[derive(Clone)]
pub struct StateHandler {
    scheduler: BleScheduler,
}

impl StateHandler {
    pub fn new(scheduler: BleScheduler) -> Self {
        Self { scheduler }
    }

    /// Raw value bytes of `state`, without any packet header.
    ///
    /// v1 peripherals are asked to notify the value on the state read
    /// characteristic; v2 peripherals answer a `GET_STATE` control command.
    pub async fn get_state(
        &self,
        handle: &PeripheralHandle,
        state: StateType,
    ) -> Result<Vec<u8>, BluenetError> {
        let profile = self.scheduler.profile(handle);
        let version = profile.control_version;
        let channel = state_channel(profile.operation_mode, version);
        let packet = match version {
            ControlVersion::V1 => state_notify_packet(state)?,
            ControlVersion::V2 => state_read_packet(version, state)?,
        };
        let result = request(&self.scheduler, handle, channel, version, &packet).await?;
        let value = result.state_value()?.to_vec();
        debug!(parent: self.scheduler.span(), %handle, state = state.0, len = value.len(), "state read");
        Ok(value)
    }

    async fn get<T: WireValue>(
        &self,
        handle: &PeripheralHandle,
        state: StateType,
    ) -> Result<T, BluenetError> {
        let value = self.get_state(handle, state).await?;
        Ok(T::decode(&value)?)
    }

    pub async fn get_error_bitmask(&self, handle: &PeripheralHandle) -> Result<u32, BluenetError> {
        self.get(handle, StateType::ERROR_BITMASK).await
    }

    pub async fn get_errors(
        &self,
        handle: &PeripheralHandle,
    ) -> Result<CrownstoneErrors, BluenetError> {
        let bitmask = self.get_error_bitmask(handle).await?;
        Ok(CrownstoneErrors::from_bitmask(bitmask))
    }

    /// Crownstone clock in seconds since epoch, local time.
    pub async fn get_time(&self, handle: &PeripheralHandle) -> Result<u32, BluenetError> {
        self.get(handle, StateType::TIME).await
    }

    pub async fn get_switch_state(&self, handle: &PeripheralHandle) -> Result<u8, BluenetError> {
        self.get(handle, StateType::SWITCH_STATE).await
    }

    pub async fn get_temperature(&self, handle: &PeripheralHandle) -> Result<i8, BluenetError> {
        self.get(handle, StateType::TEMPERATURE).await
    }
}
