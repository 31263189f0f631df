use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use bluenet_core::{AdvertisementDecryptor, CoreError};
use thiserror::Error;

/// AES block and key size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Errors returned by cipher helpers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),
    #[error("data is not a multiple of the block size: {0}")]
    InvalidDataLength(usize),
    #[error("invalid key encoding")]
    InvalidKeyEncoding,
}

impl From<CipherError> for CoreError {
    fn from(value: CipherError) -> Self {
        match value {
            CipherError::InvalidKeyLength(_) | CipherError::InvalidKeyEncoding => {
                CoreError::Decrypt("invalid key")
            }
            CipherError::InvalidDataLength(_) => CoreError::Decrypt("invalid ciphertext length"),
        }
    }
}

/// Block cipher backend operating block by block without chaining.
pub trait EcbCipher {
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// AES-128 in ECB mode, as used for service-data encryption.
#[derive(Debug, Default, Clone, Copy)]
pub struct Aes128EcbCipher;

impl Aes128EcbCipher {
    fn init_cipher(key: &[u8]) -> Result<Aes128, CipherError> {
        if key.len() != BLOCK_SIZE {
            return Err(CipherError::InvalidKeyLength(key.len()));
        }
        Aes128::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))
    }

    fn check_blocks(data: &[u8]) -> Result<(), CipherError> {
        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::InvalidDataLength(data.len()));
        }
        Ok(())
    }
}

impl EcbCipher for Aes128EcbCipher {
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let cipher = Self::init_cipher(key)?;
        Self::check_blocks(plaintext)?;
        let mut out = Vec::with_capacity(plaintext.len());
        for chunk in plaintext.chunks_exact(BLOCK_SIZE) {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.encrypt_block(&mut block);
            out.extend_from_slice(&block);
        }
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let cipher = Self::init_cipher(key)?;
        Self::check_blocks(ciphertext)?;
        let mut out = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks_exact(BLOCK_SIZE) {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.decrypt_block(&mut block);
            out.extend_from_slice(&block);
        }
        Ok(out)
    }
}

impl AdvertisementDecryptor for Aes128EcbCipher {
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(EcbCipher::decrypt(self, key, ciphertext)?)
    }
}
