use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bluenet_core::decrypt::PlaintextDecryptor;
use bluenet_core::ids::{advertisement, parse_uuid};
use bluenet_core::{AdvertisementDecryptor, DeviceType};
use serde::{Deserialize, Serialize};
use tracing::{debug, Span};
use uuid::Uuid;

use super::payload::{ServiceDataPayload, BLOCK_LEN};
use super::record::{CrownstoneMode, ServiceDataRecord};
use crate::error::CodecError;

/// Frame length of the pre-device-type protocol.
pub const LEGACY_FRAME_LEN: usize = 17;
/// Frame length carrying a public device-type byte.
pub const FRAME_LEN: usize = 18;

/// Decoder settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Offset in seconds added to UTC before rebuilding partial timestamps.
    ///
    /// Crownstones keep local time, so this should match their timezone.
    pub utc_offset_secs: i32,
}

/// Header of a service-data frame, read before any decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub op_code: u8,
    /// Public device-type byte, present only on 18-byte frames.
    pub device_type: Option<u8>,
    /// Offset of the 16-byte block that may be encrypted.
    pub block_start: usize,
}

impl FrameHeader {
    pub fn parse(frame: &[u8]) -> Result<Self, CodecError> {
        match frame.len() {
            LEGACY_FRAME_LEN => Ok(Self {
                op_code: frame[0],
                device_type: None,
                block_start: 1,
            }),
            FRAME_LEN => Ok(Self {
                op_code: frame[0],
                device_type: Some(frame[1]),
                block_start: 2,
            }),
            other => Err(CodecError::InvalidFrameLength(other)),
        }
    }
}

/// Maps an opcode onto the mode it advertises.
///
/// Opcode 1 frames carry no mode of their own; `legacy_setup` is the
/// setup bit of their flags combined with a zero Crownstone id.
pub fn mode_for_opcode(op_code: u8, legacy_setup: bool) -> CrownstoneMode {
    match op_code {
        1 if legacy_setup => CrownstoneMode::Setup,
        1 | 2 | 3 | 5 | 7 => CrownstoneMode::Operation,
        4 | 6 => CrownstoneMode::Setup,
        _ => CrownstoneMode::Unknown,
    }
}

/// Device type advertised through the legacy service UUID.
pub fn device_type_from_service_uuid(service: &Uuid) -> DeviceType {
    let matches = |short: &str| parse_uuid(short).map(|id| id == *service).unwrap_or(false);
    if matches(advertisement::CROWNSTONE_PLUG) {
        DeviceType::Plug
    } else if matches(advertisement::CROWNSTONE_BUILTIN) {
        DeviceType::Builtin
    } else if matches(advertisement::GUIDESTONE) {
        DeviceType::Guidestone
    } else {
        DeviceType::Undefined
    }
}

/// Turns raw service-data frames into [`ServiceDataRecord`]s.
///
/// Decoding never fails: invalid frames and decryption failures produce a
/// record with `data_ready_for_use == false`.
#[derive(Clone)]
pub struct ServiceDataDecoder {
    config: DecoderConfig,
    decryptor: Arc<dyn AdvertisementDecryptor>,
    span: Span,
}

impl std::fmt::Debug for ServiceDataDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDataDecoder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ServiceDataDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default(), Arc::new(PlaintextDecryptor))
    }
}

impl ServiceDataDecoder {
    pub fn new(config: DecoderConfig, decryptor: Arc<dyn AdvertisementDecryptor>) -> Self {
        Self {
            config,
            decryptor,
            span: Span::none(),
        }
    }

    /// Emits decoder logs inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decodes `frame` against the current wall clock.
    pub fn decode(
        &self,
        frame: &[u8],
        key: Option<&[u8]>,
        service_hint: Option<&Uuid>,
    ) -> ServiceDataRecord {
        self.decode_at(frame, key, service_hint, SystemTime::now())
    }

    /// Decodes `frame` with `now` as the observer clock.
    pub fn decode_at(
        &self,
        frame: &[u8],
        key: Option<&[u8]>,
        service_hint: Option<&Uuid>,
        now: SystemTime,
    ) -> ServiceDataRecord {
        let _entered = self.span.enter();
        let mut record = ServiceDataRecord::default();

        let header = match FrameHeader::parse(frame) {
            Ok(header) => header,
            Err(err) => {
                debug!(%err, "dropping service data frame");
                return record;
            }
        };
        record.op_code = header.op_code;
        record.device_type = match (header.op_code, header.device_type) {
            (5..=7, Some(byte)) => DeviceType::from_byte(byte),
            (1..=4, _) => service_hint
                .map(device_type_from_service_uuid)
                .unwrap_or(DeviceType::Unset),
            _ => DeviceType::Unset,
        };
        record.mode = mode_for_opcode(header.op_code, legacy_setup_flag(frame, &header));

        let raw_block = &frame[header.block_start..];
        let block = match key {
            Some(key) => match self.decryptor.decrypt(raw_block, key) {
                Ok(plain) if plain.len() == BLOCK_LEN => plain,
                Ok(plain) => {
                    debug!(len = plain.len(), "decryptor returned a block of the wrong size");
                    return record;
                }
                Err(err) => {
                    debug!(%err, op_code = header.op_code, "service data decryption failed");
                    return record;
                }
            },
            None => raw_block.to_vec(),
        };

        let payload = match ServiceDataPayload::decode(header.op_code, &block) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(op_code = header.op_code, "unknown service data opcode");
                return record;
            }
            Err(err) => {
                debug!(%err, "service data block rejected");
                return record;
            }
        };

        let reference = unix_seconds(now).saturating_add(i64::from(self.config.utc_offset_secs));
        record.project(payload, reference);
        record
    }
}

/// Setup rule of opcode 1 frames, read from the unencrypted bytes.
fn legacy_setup_flag(frame: &[u8], header: &FrameHeader) -> bool {
    if header.op_code != 1 {
        return false;
    }
    let start = header.block_start;
    let id = u16::from_le_bytes([frame[start], frame[start + 1]]);
    let flags = frame[start + 3];
    flags & 0x80 != 0 && id == 0
}

fn unix_seconds(now: SystemTime) -> i64 {
    match now.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
    }
}
