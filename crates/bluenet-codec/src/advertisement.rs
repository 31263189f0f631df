//! Discovery-event wrapper around the service-data decoder.

use std::collections::HashMap;

use bluenet_core::ids::{advertisement, parse_uuid, services};
use bluenet_core::PeripheralHandle;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::service_data::{FrameHeader, ServiceDataDecoder, ServiceDataRecord};

/// Which Crownstone-family service UUID carried the service data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FamilyService {
    Plug,
    Builtin,
    Guidestone,
}

/// One received advertisement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
    pub handle: PeripheralHandle,
    pub name: String,
    pub rssi: i16,
    /// Id of the entity (sphere) whose keys decrypt this advertisement.
    pub reference_id: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Family service the decoded frame came from.
    pub family_service: Option<FamilyService>,
    pub scan_response: Option<ServiceDataRecord>,
    pub is_in_dfu_mode: bool,
}

impl Advertisement {
    /// Wraps a discovery event and decodes its service data without a key.
    pub fn new(
        handle: PeripheralHandle,
        name: Option<String>,
        rssi: i16,
        service_uuids: Vec<Uuid>,
        service_data: HashMap<Uuid, Vec<u8>>,
        decoder: &ServiceDataDecoder,
    ) -> Self {
        let dfu = parse_uuid(services::DFU).ok();
        let is_in_dfu_mode = dfu.is_some_and(|dfu| {
            service_uuids.contains(&dfu) || service_data.contains_key(&dfu)
        });
        let mut ad = Self {
            handle,
            name: name.unwrap_or_default(),
            rssi,
            reference_id: None,
            service_uuids,
            service_data,
            family_service: None,
            scan_response: None,
            is_in_dfu_mode,
        };
        if let Some((service, family)) = ad.family_entry() {
            ad.family_service = Some(family);
            ad.scan_response = ad
                .service_data
                .get(&service)
                .map(|frame| decoder.decode(frame, None, Some(&service)));
        }
        ad
    }

    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    fn family_entry(&self) -> Option<(Uuid, FamilyService)> {
        [
            (advertisement::CROWNSTONE_PLUG, FamilyService::Plug),
            (advertisement::CROWNSTONE_BUILTIN, FamilyService::Builtin),
            (advertisement::GUIDESTONE, FamilyService::Guidestone),
        ]
        .into_iter()
        .filter_map(|(id, family)| parse_uuid(id).ok().map(|uuid| (uuid, family)))
        .find(|(uuid, _)| self.service_data.contains_key(uuid))
    }

    fn family_frame(&self) -> Option<(Uuid, &[u8])> {
        let (service, _) = self.family_entry()?;
        self.service_data
            .get(&service)
            .map(|frame| (service, frame.as_slice()))
    }

    pub fn has_service_data(&self) -> bool {
        !self.service_data.is_empty()
    }

    /// Set when the family frame has a length the decoder accepts.
    pub fn is_crownstone_family(&self) -> bool {
        self.family_frame()
            .is_some_and(|(_, frame)| FrameHeader::parse(frame).is_ok())
    }

    pub fn is_setup_mode(&self) -> bool {
        self.scan_response
            .as_ref()
            .is_some_and(ServiceDataRecord::is_setup_mode)
    }

    pub fn is_dfu_mode(&self) -> bool {
        self.is_in_dfu_mode
    }

    pub fn unique_element(&self) -> Option<String> {
        self.scan_response
            .as_ref()
            .map(ServiceDataRecord::unique_element)
    }

    /// Re-decodes the family frame with `key`, replacing the scan response.
    pub fn decrypt(&mut self, key: &[u8], decoder: &ServiceDataDecoder) {
        if let Some((service, frame)) = self.family_frame() {
            let record = decoder.decode(frame, Some(key), Some(&service));
            self.scan_response = Some(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Vec<u8> {
        vec![
            0x03, 0x00, 0x05, 0x01, 0b0001_0011, 0xF4, 0x0A, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00,
            0xE8, 0x03, 0x00, 0xFA,
        ]
    }

    fn plug_ad(frame: Vec<u8>) -> Advertisement {
        let plug = parse_uuid(advertisement::CROWNSTONE_PLUG).unwrap();
        Advertisement::new(
            PeripheralHandle::from("peripheral-1"),
            Some("crown".into()),
            -60,
            vec![],
            HashMap::from([(plug, frame)]),
            &ServiceDataDecoder::default(),
        )
    }

    #[test]
    fn family_service_data_is_decoded() {
        let ad = plug_ad(frame());
        assert!(ad.has_service_data());
        assert!(ad.is_crownstone_family());
        assert_eq!(ad.family_service, Some(FamilyService::Plug));
        let record = ad.scan_response.as_ref().unwrap();
        assert!(record.data_ready_for_use);
        assert_eq!(record.crownstone_id, 5);
        assert_eq!(ad.unique_element().as_deref(), Some("E8030000"));
        assert!(!ad.is_setup_mode());
        assert!(!ad.is_dfu_mode());
    }

    #[test]
    fn foreign_service_data_is_ignored() {
        let other = parse_uuid("FEAA").unwrap();
        let ad = Advertisement::new(
            PeripheralHandle::from("p"),
            None,
            -80,
            vec![],
            HashMap::from([(other, frame())]),
            &ServiceDataDecoder::default(),
        );
        assert!(ad.has_service_data());
        assert!(!ad.is_crownstone_family());
        assert!(ad.scan_response.is_none());
        assert_eq!(ad.name, "");
    }

    #[test]
    fn dfu_service_marks_dfu_mode() {
        let dfu = parse_uuid(services::DFU).unwrap();
        let ad = Advertisement::new(
            PeripheralHandle::from("p"),
            None,
            -50,
            vec![dfu],
            HashMap::new(),
            &ServiceDataDecoder::default(),
        );
        assert!(ad.is_dfu_mode());
        assert!(!ad.has_service_data());
    }

    #[test]
    fn setup_opcode_marks_setup_mode() {
        let mut data = frame();
        data[0] = 0x04;
        let ad = plug_ad(data);
        assert!(ad.is_setup_mode());
    }
}
