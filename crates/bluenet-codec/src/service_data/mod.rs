//! Advertisement service-data decoding.
//!
//! A frame is 17 bytes (opcode + 16-byte block) or 18 bytes (opcode +
//! device type + 16-byte block). The block may be encrypted; it is
//! decrypted first, decoded once into a [`ServiceDataPayload`] variant and
//! then projected into a [`ServiceDataRecord`].

mod decoder;
pub mod payload;
mod record;
pub mod timestamp;

pub use decoder::{
    device_type_from_service_uuid, mode_for_opcode, DecoderConfig, FrameHeader,
    ServiceDataDecoder, FRAME_LEN, LEGACY_FRAME_LEN,
};
pub use payload::ServiceDataPayload;
pub use record::{power_factor_from_raw, CrownstoneMode, ServiceDataRecord};
pub use timestamp::{reconstruct_timestamp, Timestamp};
