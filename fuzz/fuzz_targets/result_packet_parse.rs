#![no_main]

use bluenet_codec::packets::ResultPacket;
use bluenet_core::ControlVersion;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for version in [ControlVersion::V1, ControlVersion::V2] {
        if let Ok(packet) = ResultPacket::parse(version, data) {
            let _ = packet.state_value();
        }
    }
});
