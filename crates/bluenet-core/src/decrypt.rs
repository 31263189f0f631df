use crate::error::CoreError;

/// Decryption collaborator used by the service-data decoder.
///
/// Implementations receive the encrypted slice of a frame and the key the
/// caller supplied, and return the plaintext of the same length.
pub trait AdvertisementDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CoreError>;
}

/// Pass-through decryptor for unencrypted deployments and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextDecryptor;

impl AdvertisementDecryptor for PlaintextDecryptor {
    fn decrypt(&self, ciphertext: &[u8], _key: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(ciphertext.to_vec())
    }
}
