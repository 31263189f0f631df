//! Cryptographic helpers used by Bluenet.
//!
//! Provides the AES-128-ECB cipher that decrypts advertisement service data
//! and parsing of the string keys handed out per sphere.

pub mod ecb;
pub mod keys;

pub use ecb::{Aes128EcbCipher, CipherError, EcbCipher};
pub use keys::{parse_key, SphereKeys};
