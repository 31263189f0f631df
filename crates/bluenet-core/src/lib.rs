//! Core Bluenet primitives shared across crates.
//!
//! Includes the peripheral handle, GATT identifier tables, connection
//! profile enums, the Crownstone error bitmask, and the decryption seam.

pub mod bitmask;
pub mod decrypt;
pub mod error;
pub mod ids;
pub mod types;

pub use bitmask::CrownstoneErrors;
pub use decrypt::AdvertisementDecryptor;
pub use error::CoreError;
pub use types::{ControlVersion, DeviceType, OperationMode, PeripheralHandle};
