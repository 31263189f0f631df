//! Protocol handlers built on the BLE scheduler.
//!
//! Each handler is a cheap clone around the shared scheduler and operates
//! on the peripheral handle passed to every call.

pub mod config;
pub mod dfu;
pub mod setup;
pub mod state;

use bluenet_codec::packets::ResultPacket;
use bluenet_codec::{CodecError, DataStepper};
use bluenet_core::ids::ControlChannel;
use bluenet_core::{ControlVersion, PeripheralHandle};
use bluenet_transport_ble::{BleScheduler, WriteMode};

use crate::error::BluenetError;

pub use config::ConfigHandler;
pub use dfu::{DfuHandler, DfuResponse, ImageSizes};
pub use setup::{SetupHandler, SetupParameters};
pub use state::StateHandler;

/// Writes `packet` to the channel's control characteristic and returns the
/// parsed packet notified on its result characteristic.
pub(crate) async fn request(
    scheduler: &BleScheduler,
    handle: &PeripheralHandle,
    channel: ControlChannel,
    version: ControlVersion,
    packet: &[u8],
) -> Result<ResultPacket, BluenetError> {
    let data = scheduler
        .setup_single_notification(handle, channel.service, channel.result, || {
            scheduler.write(
                handle,
                channel.service,
                channel.control,
                packet,
                WriteMode::WithResponse,
            )
        })
        .await?;
    let result = ResultPacket::parse(version, &data)?;
    if version == ControlVersion::V2 && !result.result.is_success() {
        return Err(BluenetError::CommandRejected(result.result));
    }
    Ok(result)
}

/// Fixed-size little-endian config and state values.
pub trait WireValue: Sized {
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;
    fn encode(&self) -> Vec<u8>;
}

macro_rules! wire_value {
    ($($ty:ty => $read:ident),* $(,)?) => {
        $(
            impl WireValue for $ty {
                fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
                    DataStepper::new(bytes).$read()
                }

                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

wire_value!(u8 => u8, i8 => i8, u16 => u16, i16 => i16, u32 => u32, i32 => i32);

impl WireValue for f32 {
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        DataStepper::new(bytes).u32().map(f32::from_bits)
    }

    fn encode(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }
}

impl WireValue for bool {
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        DataStepper::new(bytes).u8().map(|value| value != 0)
    }

    fn encode(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }
}

/// iBeacon UUIDs go over the air least significant byte first.
pub(crate) fn ibeacon_uuid_bytes(value: &str) -> Result<Vec<u8>, BluenetError> {
    let uuid = uuid::Uuid::parse_str(value.trim())
        .map_err(|_| BluenetError::InvalidInput("ibeacon uuid"))?;
    Ok(uuid.as_bytes().iter().rev().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_little_endian() {
        assert_eq!(0x0102_u16.encode(), vec![0x02, 0x01]);
        assert_eq!(u16::decode(&[0x02, 0x01, 0xFF]).unwrap(), 0x0102);
        assert_eq!((-12_i8).encode(), vec![0xF4]);
        assert_eq!(i32::decode(&(-5_i32).to_le_bytes()).unwrap(), -5);
        assert_eq!(f32::decode(&1.5_f32.to_le_bytes()).unwrap(), 1.5);
        assert!(bool::decode(&[2]).unwrap());
        assert_eq!(true.encode(), vec![1]);
    }

    #[test]
    fn short_values_are_rejected() {
        assert!(matches!(
            u32::decode(&[1, 2]),
            Err(CodecError::InvalidDataLength { .. })
        ));
    }

    #[test]
    fn ibeacon_uuid_is_reversed() {
        let bytes = ibeacon_uuid_bytes("00010203-0405-0607-0809-0a0b0c0d0e0f").unwrap();
        assert_eq!(bytes[0], 0x0f);
        assert_eq!(bytes[15], 0x00);
        assert!(ibeacon_uuid_bytes("not-a-uuid").is_err());
    }
}
