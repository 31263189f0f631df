use bluenet_codec::packets::{
    control_packet, state_read_packet, state_write_packet, ControlCommand, StateType,
    V1_HEADER_LEN,
};
use bluenet_codec::CodecError;
use bluenet_core::ids::{services, setup};
use bluenet_core::{ControlVersion, PeripheralHandle};
use bluenet_crypto::parse_key;
use bluenet_transport_ble::{BleScheduler, WriteMode};
use tracing::{info, warn};

use super::{ibeacon_uuid_bytes, WireValue};
use crate::error::BluenetError;

const MAC_ADDRESS_LEN: usize = 6;
const FACTORY_RESET_CODE: u32 = 0xDEAD_BEEF;

/// Values written to a Crownstone while it is in setup mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParameters {
    pub crownstone_id: u16,
    /// 32 hex digits or 16 raw characters each.
    pub admin_key: String,
    pub member_key: String,
    pub guest_key: String,
    /// 8 hex digits.
    pub mesh_access_address: String,
    pub ibeacon_uuid: String,
    pub ibeacon_major: u16,
    pub ibeacon_minor: u16,
}

/// Commissions Crownstones that advertise in setup mode.
///
/// Setup writes always use the v1 config characteristics of the setup
/// service and are verified by reading them back.
#[derive(Clone)]
pub struct SetupHandler {
    scheduler: BleScheduler,
    max_retries: u8,
}

impl SetupHandler {
    pub fn new(scheduler: BleScheduler, max_retries: u8) -> Self {
        Self {
            scheduler,
            max_retries,
        }
    }

    /// Connects, writes every setup value, validates the setup and
    /// disconnects again.
    pub async fn setup(
        &self,
        handle: &PeripheralHandle,
        params: &SetupParameters,
    ) -> Result<(), BluenetError> {
        self.scheduler.is_ready().await;
        self.scheduler.connect(handle).await?;
        let outcome = self.write_all(handle, params).await;
        let disconnected = self.scheduler.disconnect(handle).await;
        if let Err(err) = outcome {
            warn!(parent: self.scheduler.span(), %handle, %err, "setup failed");
            if let Err(cleanup) = disconnected {
                warn!(parent: self.scheduler.span(), %handle, err = %cleanup, "disconnect after failed setup failed");
            }
            return Err(err);
        }
        disconnected?;
        info!(parent: self.scheduler.span(), %handle, id = params.crownstone_id, "setup complete");
        Ok(())
    }

    async fn write_all(
        &self,
        handle: &PeripheralHandle,
        params: &SetupParameters,
    ) -> Result<(), BluenetError> {
        self.write_crownstone_id(handle, params.crownstone_id).await?;
        self.write_admin_key(handle, &params.admin_key).await?;
        self.write_member_key(handle, &params.member_key).await?;
        self.write_guest_key(handle, &params.guest_key).await?;
        self.write_mesh_access_address(handle, &params.mesh_access_address)
            .await?;
        self.write_ibeacon_uuid(handle, &params.ibeacon_uuid).await?;
        self.write_ibeacon_major(handle, params.ibeacon_major).await?;
        self.write_ibeacon_minor(handle, params.ibeacon_minor).await?;
        self.finalize_setup(handle).await
    }

    /// MAC address as `F3:D4:A1:CC:FF:32`. The characteristic holds it
    /// least significant byte first.
    pub async fn get_mac_address(&self, handle: &PeripheralHandle) -> Result<String, BluenetError> {
        let data = self
            .scheduler
            .read(handle, services::SETUP, setup::MAC_ADDRESS)
            .await?;
        if data.len() != MAC_ADDRESS_LEN {
            return Err(CodecError::IncorrectResponseLength {
                expected: MAC_ADDRESS_LEN,
                actual: data.len(),
            }
            .into());
        }
        Ok(data
            .iter()
            .rev()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(":"))
    }

    pub async fn write_crownstone_id(&self, handle: &PeripheralHandle, id: u16) -> Result<(), BluenetError> {
        self.write_and_verify(handle, StateType::CROWNSTONE_ID, &id.encode())
            .await
    }

    pub async fn write_admin_key(&self, handle: &PeripheralHandle, key: &str) -> Result<(), BluenetError> {
        let key = parse_key(key)?;
        self.write_and_verify(handle, StateType::KEY_ADMIN, &key).await
    }

    pub async fn write_member_key(&self, handle: &PeripheralHandle, key: &str) -> Result<(), BluenetError> {
        let key = parse_key(key)?;
        self.write_and_verify(handle, StateType::KEY_MEMBER, &key).await
    }

    pub async fn write_guest_key(&self, handle: &PeripheralHandle, key: &str) -> Result<(), BluenetError> {
        let key = parse_key(key)?;
        self.write_and_verify(handle, StateType::KEY_GUEST, &key).await
    }

    pub async fn write_mesh_access_address(
        &self,
        handle: &PeripheralHandle,
        address: &str,
    ) -> Result<(), BluenetError> {
        let bytes = hex::decode(address.trim())
            .map_err(|_| BluenetError::InvalidInput("mesh access address must be hex"))?;
        if bytes.len() != 4 {
            return Err(BluenetError::InvalidInput("mesh access address must be 4 bytes"));
        }
        self.write_and_verify(handle, StateType::MESH_ACCESS_ADDRESS, &bytes)
            .await
    }

    pub async fn write_ibeacon_uuid(&self, handle: &PeripheralHandle, uuid: &str) -> Result<(), BluenetError> {
        let bytes = ibeacon_uuid_bytes(uuid)?;
        self.write_and_verify(handle, StateType::IBEACON_UUID, &bytes)
            .await
    }

    pub async fn write_ibeacon_major(&self, handle: &PeripheralHandle, major: u16) -> Result<(), BluenetError> {
        self.write_and_verify(handle, StateType::IBEACON_MAJOR, &major.encode())
            .await
    }

    pub async fn write_ibeacon_minor(&self, handle: &PeripheralHandle, minor: u16) -> Result<(), BluenetError> {
        self.write_and_verify(handle, StateType::IBEACON_MINOR, &minor.encode())
            .await
    }

    /// Writes `payload`, asks for it back and compares everything after the
    /// packet header. Gives up after `max_retries` extra attempts.
    pub async fn write_and_verify(
        &self,
        handle: &PeripheralHandle,
        config: StateType,
        payload: &[u8],
    ) -> Result<(), BluenetError> {
        let written = state_write_packet(ControlVersion::V1, config, payload)?;
        let read_request = state_read_packet(ControlVersion::V1, config)?;

        for attempt in 0..=self.max_retries {
            self.write_config_packet(handle, &written).await?;
            self.write_config_packet(handle, &read_request).await?;
            let read_back = self
                .scheduler
                .read(handle, services::SETUP, setup::CONFIG_READ)
                .await?;
            if read_back_matches(&written, &read_back) {
                info!(parent: self.scheduler.span(), %handle, config = config.0, attempt, "config verified");
                return Ok(());
            }
            warn!(parent: self.scheduler.span(), %handle, config = config.0, attempt, "config read-back mismatch");
        }
        Err(BluenetError::CannotWriteAndVerify(config))
    }

    /// Tells the Crownstone that all setup values are in place.
    pub async fn finalize_setup(&self, handle: &PeripheralHandle) -> Result<(), BluenetError> {
        let packet = control_packet(ControlVersion::V1, ControlCommand::ValidateSetup, &[])?;
        self.write_setup_control(handle, &packet).await
    }

    pub async fn factory_reset(&self, handle: &PeripheralHandle) -> Result<(), BluenetError> {
        let packet = control_packet(
            ControlVersion::V1,
            ControlCommand::FactoryReset,
            &FACTORY_RESET_CODE.to_le_bytes(),
        )?;
        self.write_setup_control(handle, &packet).await
    }

    async fn write_config_packet(&self, handle: &PeripheralHandle, packet: &[u8]) -> Result<(), BluenetError> {
        self.scheduler
            .write(
                handle,
                services::SETUP,
                setup::CONFIG_CONTROL,
                packet,
                WriteMode::WithResponse,
            )
            .await?;
        Ok(())
    }

    async fn write_setup_control(&self, handle: &PeripheralHandle, packet: &[u8]) -> Result<(), BluenetError> {
        self.scheduler
            .write(
                handle,
                services::SETUP,
                setup::CONTROL,
                packet,
                WriteMode::WithResponse,
            )
            .await?;
        Ok(())
    }
}

fn read_back_matches(written: &[u8], read_back: &[u8]) -> bool {
    written.len() == read_back.len() && written[V1_HEADER_LEN..] == read_back[V1_HEADER_LEN..]
}
