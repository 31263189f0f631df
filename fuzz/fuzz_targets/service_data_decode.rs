#![no_main]

use std::sync::Arc;

use bluenet_codec::{DecoderConfig, ServiceDataDecoder};
use bluenet_crypto::Aes128EcbCipher;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let decoder = ServiceDataDecoder::new(DecoderConfig::default(), Arc::new(Aes128EcbCipher));
    let key = [0x42_u8; 16];
    let _ = decoder.decode(data, None, None);
    let _ = decoder.decode(data, Some(&key), None);
});
