use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque peripheral identifier (platform UUID or MAC string).
///
/// Keys every piece of per-connection state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeripheralHandle(String);

impl PeripheralHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeripheralHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeripheralHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which GATT characteristic set and packet format a connection uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    #[default]
    Normal,
    Setup,
    Dfu,
}

/// Control protocol version assumed for a connected peripheral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlVersion {
    #[default]
    V1,
    V2,
}

/// Hardware family advertised by a Crownstone.
///
/// `Unset` means the frame carried no type information at all,
/// `Undefined` means it did but the value is not known to this library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    #[default]
    Unset,
    Undefined,
    Plug,
    Guidestone,
    Builtin,
    CrownstoneUsb,
    BuiltinOne,
    PlugOne,
    Hub,
}

impl DeviceType {
    /// Maps the public device-type byte of an 18-byte service-data frame.
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => Self::Plug,
            2 => Self::Guidestone,
            3 => Self::Builtin,
            4 => Self::CrownstoneUsb,
            5 => Self::BuiltinOne,
            6 => Self::PlugOne,
            7 => Self::Hub,
            _ => Self::Undefined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_display_matches_input() {
        let handle = PeripheralHandle::from("C0:FF:EE:00:11:22");
        assert_eq!(handle.to_string(), "C0:FF:EE:00:11:22");
        assert_eq!(handle.as_str(), "C0:FF:EE:00:11:22");
    }

    #[test]
    fn device_type_byte_mapping() {
        assert_eq!(DeviceType::from_byte(1), DeviceType::Plug);
        assert_eq!(DeviceType::from_byte(7), DeviceType::Hub);
        assert_eq!(DeviceType::from_byte(0), DeviceType::Undefined);
        assert_eq!(DeviceType::from_byte(200), DeviceType::Undefined);
    }
}
