//! GATT service and characteristic identifiers.
//!
//! UUIDs are kept as strings (the form the device documentation uses) and
//! parsed on demand with [`parse_uuid`], which also accepts 16-bit short
//! forms such as `"C001"`.

use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{ControlVersion, OperationMode};

/// Bluetooth base UUID that 16-bit short identifiers expand into.
const BLUETOOTH_BASE_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

pub mod advertisement {
    pub const CROWNSTONE_PLUG: &str = "C001";
    pub const CROWNSTONE_BUILTIN: &str = "C002";
    pub const GUIDESTONE: &str = "C003";
    pub const DFU: &str = "00001530-1212-efde-1523-785feabcd123";
}

pub mod services {
    pub const CROWNSTONE: &str = "24f00000-7d10-4805-bfc1-7663a01c3bff";
    pub const SETUP: &str = "24f10000-7d10-4805-bfc1-7663a01c3bff";
    pub const GENERAL: &str = "24f20000-7d10-4805-bfc1-7663a01c3bff";
    pub const POWER: &str = "24f30000-7d10-4805-bfc1-7663a01c3bff";
    pub const DFU: &str = "00001530-1212-efde-1523-785feabcd123";
}

pub mod crownstone {
    pub const CONTROL: &str = "24f00001-7d10-4805-bfc1-7663a01c3bff";
    pub const MESH_CONTROL: &str = "24f00002-7d10-4805-bfc1-7663a01c3bff";
    pub const CONFIG_CONTROL: &str = "24f00004-7d10-4805-bfc1-7663a01c3bff";
    pub const CONFIG_READ: &str = "24f00005-7d10-4805-bfc1-7663a01c3bff";
    pub const STATE_CONTROL: &str = "24f00006-7d10-4805-bfc1-7663a01c3bff";
    pub const STATE_READ: &str = "24f00007-7d10-4805-bfc1-7663a01c3bff";
    pub const CONTROL_V2: &str = "24f0000c-7d10-4805-bfc1-7663a01c3bff";
    pub const RESULT_V2: &str = "24f0000d-7d10-4805-bfc1-7663a01c3bff";
}

pub mod setup {
    pub const CONTROL: &str = "24f10001-7d10-4805-bfc1-7663a01c3bff";
    pub const MAC_ADDRESS: &str = "24f10002-7d10-4805-bfc1-7663a01c3bff";
    pub const SESSION_KEY: &str = "24f10003-7d10-4805-bfc1-7663a01c3bff";
    pub const CONFIG_CONTROL: &str = "24f10004-7d10-4805-bfc1-7663a01c3bff";
    pub const CONFIG_READ: &str = "24f10005-7d10-4805-bfc1-7663a01c3bff";
    pub const SETUP_CONTROL_V3: &str = "24f1000a-7d10-4805-bfc1-7663a01c3bff";
    pub const RESULT_V2: &str = "24f1000b-7d10-4805-bfc1-7663a01c3bff";
}

pub mod dfu {
    pub const CONTROL_POINT: &str = "00001531-1212-efde-1523-785feabcd123";
    pub const PACKET: &str = "00001532-1212-efde-1523-785feabcd123";
}

pub mod power {
    pub const RELAY: &str = "24f30002-7d10-4805-bfc1-7663a01c3bff";
}

/// Parses a full 128-bit UUID or a 4-hex-digit Bluetooth short form.
pub fn parse_uuid(value: &str) -> Result<Uuid, CoreError> {
    let trimmed = value.trim();
    let parsed = if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        Uuid::parse_str(&format!("0000{trimmed}{BLUETOOTH_BASE_SUFFIX}"))
    } else {
        Uuid::parse_str(trimmed)
    };
    parsed.map_err(|_| CoreError::InvalidUuid(value.to_string()))
}

/// Where control packets go and where their results come back from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChannel {
    pub service: &'static str,
    pub control: &'static str,
    pub result: &'static str,
}

/// Resolves the config channel for an operation mode and control version.
pub fn config_channel(mode: OperationMode, version: ControlVersion) -> ControlChannel {
    match (mode, version) {
        (OperationMode::Setup, ControlVersion::V2) => ControlChannel {
            service: services::SETUP,
            control: setup::SETUP_CONTROL_V3,
            result: setup::RESULT_V2,
        },
        (OperationMode::Setup, ControlVersion::V1) => ControlChannel {
            service: services::SETUP,
            control: setup::CONFIG_CONTROL,
            result: setup::CONFIG_READ,
        },
        (_, ControlVersion::V2) => ControlChannel {
            service: services::CROWNSTONE,
            control: crownstone::CONTROL_V2,
            result: crownstone::RESULT_V2,
        },
        (_, ControlVersion::V1) => ControlChannel {
            service: services::CROWNSTONE,
            control: crownstone::CONFIG_CONTROL,
            result: crownstone::CONFIG_READ,
        },
    }
}

/// Resolves the state channel for an operation mode and control version.
pub fn state_channel(mode: OperationMode, version: ControlVersion) -> ControlChannel {
    match version {
        ControlVersion::V2 => config_channel(mode, version),
        ControlVersion::V1 => ControlChannel {
            service: services::CROWNSTONE,
            control: crownstone::STATE_CONTROL,
            result: crownstone::STATE_READ,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuid_expands_to_base_uuid() {
        let uuid = parse_uuid(advertisement::CROWNSTONE_PLUG).unwrap();
        assert_eq!(uuid.to_string(), "0000c001-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn parse_is_case_insensitive() {
        let upper = parse_uuid("24F00001-7D10-4805-BFC1-7663A01C3BFF").unwrap();
        let lower = parse_uuid(crownstone::CONTROL).unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            parse_uuid("not-a-uuid"),
            Err(CoreError::InvalidUuid("not-a-uuid".into()))
        );
    }

    #[test]
    fn config_channel_follows_mode_and_version() {
        let normal_v1 = config_channel(OperationMode::Normal, ControlVersion::V1);
        assert_eq!(normal_v1.control, crownstone::CONFIG_CONTROL);
        assert_eq!(normal_v1.result, crownstone::CONFIG_READ);

        let setup_v2 = config_channel(OperationMode::Setup, ControlVersion::V2);
        assert_eq!(setup_v2.service, services::SETUP);
        assert_eq!(setup_v2.control, setup::SETUP_CONTROL_V3);
        assert_eq!(setup_v2.result, setup::RESULT_V2);
    }

    #[test]
    fn every_table_entry_parses() {
        for id in [
            services::CROWNSTONE,
            services::SETUP,
            services::DFU,
            crownstone::CONTROL_V2,
            crownstone::RESULT_V2,
            setup::SETUP_CONTROL_V3,
            setup::MAC_ADDRESS,
            dfu::CONTROL_POINT,
            dfu::PACKET,
            advertisement::GUIDESTONE,
        ] {
            assert!(parse_uuid(id).is_ok(), "{id} should parse");
        }
    }
}
