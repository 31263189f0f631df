use bluenet_core::ids::{crownstone, parse_uuid, services, setup};
use bluenet_core::{ControlVersion, OperationMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::Characteristic;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Operation mode and control version of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub operation_mode: OperationMode,
    pub control_version: ControlVersion,
}

impl ConnectionProfile {
    /// Setup service wins over DFU; the v2 control characteristic (or the
    /// setup v3 one) selects the v2 packet format.
    pub fn detect(
        service_uuids: &[Uuid],
        characteristics: impl Fn(&Uuid) -> Vec<Characteristic>,
    ) -> Self {
        let has_service = |id: &str| {
            parse_uuid(id)
                .map(|uuid| service_uuids.contains(&uuid))
                .unwrap_or(false)
        };
        let has_characteristic = |service: &str, characteristic: &str| {
            match (parse_uuid(service), parse_uuid(characteristic)) {
                (Ok(service), Ok(characteristic)) => characteristics(&service)
                    .iter()
                    .any(|c| c.uuid == characteristic),
                _ => false,
            }
        };

        if has_service(services::SETUP) {
            let control_version = if has_characteristic(services::SETUP, setup::SETUP_CONTROL_V3) {
                ControlVersion::V2
            } else {
                ControlVersion::V1
            };
            return Self {
                operation_mode: OperationMode::Setup,
                control_version,
            };
        }
        if has_service(services::DFU) {
            return Self {
                operation_mode: OperationMode::Dfu,
                control_version: ControlVersion::V1,
            };
        }
        let control_version = if has_service(services::CROWNSTONE)
            && has_characteristic(services::CROWNSTONE, crownstone::CONTROL_V2)
        {
            ControlVersion::V2
        } else {
            ControlVersion::V1
        };
        Self {
            operation_mode: OperationMode::Normal,
            control_version,
        }
    }
}

/// Per-handle connection record owned by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub profile: ConnectionProfile,
}

impl ConnectionState {
    /// Fresh record for a new attempt; the profile is re-detected per connection.
    pub fn connecting() -> Self {
        Self {
            phase: ConnectionPhase::Connecting,
            profile: ConnectionProfile::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CharacteristicProperties;

    fn uuid(id: &str) -> Uuid {
        parse_uuid(id).unwrap()
    }

    fn characteristic(service: &str, id: &str) -> Characteristic {
        Characteristic {
            service: uuid(service),
            uuid: uuid(id),
            properties: CharacteristicProperties::default(),
        }
    }

    #[test]
    fn setup_service_with_v3_control_is_setup_v2() {
        let services = [uuid(services::SETUP)];
        let profile = ConnectionProfile::detect(&services, |_| {
            vec![characteristic(services::SETUP, setup::SETUP_CONTROL_V3)]
        });
        assert_eq!(profile.operation_mode, OperationMode::Setup);
        assert_eq!(profile.control_version, ControlVersion::V2);
    }

    #[test]
    fn dfu_service_is_dfu() {
        let services = [uuid(services::DFU)];
        let profile = ConnectionProfile::detect(&services, |_| Vec::new());
        assert_eq!(profile.operation_mode, OperationMode::Dfu);
    }

    #[test]
    fn crownstone_service_version_follows_control_characteristic() {
        let services = [uuid(services::CROWNSTONE)];
        let v1 = ConnectionProfile::detect(&services, |_| {
            vec![characteristic(services::CROWNSTONE, crownstone::CONTROL)]
        });
        assert_eq!(v1.operation_mode, OperationMode::Normal);
        assert_eq!(v1.control_version, ControlVersion::V1);

        let v2 = ConnectionProfile::detect(&services, |_| {
            vec![characteristic(services::CROWNSTONE, crownstone::CONTROL_V2)]
        });
        assert_eq!(v2.control_version, ControlVersion::V2);
    }

    #[test]
    fn new_attempt_resets_profile() {
        let state = ConnectionState::connecting();
        assert_eq!(state.phase, ConnectionPhase::Connecting);
        assert_eq!(state.profile, ConnectionProfile::default());
        assert!(!state.is_connected());
    }
}
