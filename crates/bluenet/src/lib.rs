//! Crownstone BLE library.
//!
//! [`Bluenet`] ties the operation scheduler, the service-data decoder and
//! the named event bus together and hands out the protocol handlers.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod logging;
pub mod relay;

pub use client::Bluenet;
pub use config::BluenetConfig;
pub use error::BluenetError;
pub use events::{BluenetEvent, EventBus, EventStream};
pub use handlers::{
    ConfigHandler, DfuHandler, DfuResponse, ImageSizes, SetupHandler, SetupParameters,
    StateHandler,
};
pub use relay::EncryptionSettings;
