use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, UNIX_EPOCH};

use bluenet_codec::packets::ResultPacket;
use bluenet_codec::service_data::{reconstruct_timestamp, ServiceDataDecoder, ServiceDataPayload};
use bluenet_core::ControlVersion;

fn xorshift64(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut s = seed.max(1);
    let mut out = vec![0_u8; len];
    for b in &mut out {
        *b = (xorshift64(&mut s) & 0xFF) as u8;
    }
    out
}

#[test]
fn fuzz_like_random_frames_do_not_panic_decoder() {
    let decoder = ServiceDataDecoder::default();
    let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    for i in 0..4000_u64 {
        // bias towards the two accepted frame lengths
        let len = match i % 4 {
            0 => 17,
            1 => 18,
            _ => ((i as usize) * 13) % 40,
        };
        let data = random_bytes(0xB1E5EED ^ i, len);

        let plain =
            panic::catch_unwind(AssertUnwindSafe(|| decoder.decode_at(&data, None, None, now)));
        assert!(plain.is_ok(), "decode panicked at case {i}");

        let keyed = panic::catch_unwind(AssertUnwindSafe(|| {
            decoder.decode_at(&data, Some(&[0x11; 16]), None, now)
        }));
        assert!(keyed.is_ok(), "keyed decode panicked at case {i}");
    }
}

#[test]
fn every_opcode_and_type_decodes_any_block() {
    for op_code in 0..=8_u8 {
        for i in 0..256_u64 {
            let mut block = random_bytes(0xC0FFEE ^ (u64::from(op_code) << 8) ^ i, 16);
            block[0] = (i % 8) as u8;
            let res = panic::catch_unwind(|| ServiceDataPayload::decode(op_code, &block));
            assert!(res.is_ok(), "payload decode panicked at opcode {op_code} case {i}");
        }
    }
}

#[test]
fn result_packets_never_panic() {
    for i in 0..2000_u64 {
        let len = (i as usize * 7) % 64;
        let data = random_bytes(0xFEED ^ i, len);
        let v1 = panic::catch_unwind(|| ResultPacket::parse(ControlVersion::V1, &data));
        assert!(v1.is_ok(), "v1 result parse panicked at case {i}");
        let v2 = panic::catch_unwind(|| {
            ResultPacket::parse(ControlVersion::V2, &data).map(|p| p.state_value().map(<[u8]>::len))
        });
        assert!(v2.is_ok(), "v2 result parse panicked at case {i}");
    }
}

#[test]
fn reconstructed_timestamps_keep_device_low_bits() {
    let mut s = 0xDEAD_BEEF_u64;
    for _ in 0..2000 {
        let reference = i64::from((xorshift64(&mut s) & 0x7FFF_FFFF) as u32) + 0x10000;
        let partial = (xorshift64(&mut s) & 0xFFFF) as u16;
        let ts = reconstruct_timestamp(reference, partial);
        assert_eq!(ts & 0xFFFF, u32::from(partial));
        assert!((i64::from(ts) - reference).abs() <= 0x8000);
    }
}
