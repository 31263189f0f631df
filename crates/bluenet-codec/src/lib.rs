//! Crownstone wire codec.
//!
//! Decodes advertisement service data into typed device state and
//! encodes/decodes the control, config and result packets exchanged over
//! GATT.

pub mod advertisement;
pub mod error;
pub mod packets;
pub mod service_data;
pub mod stepper;

pub use advertisement::Advertisement;
pub use error::CodecError;
pub use service_data::{
    CrownstoneMode, DecoderConfig, ServiceDataDecoder, ServiceDataPayload, ServiceDataRecord,
    Timestamp,
};
pub use stepper::DataStepper;
