use crate::ecb::{CipherError, BLOCK_SIZE};

/// Parses a 16-byte key given as 32 hex digits or 16 raw characters.
pub fn parse_key(value: &str) -> Result<[u8; BLOCK_SIZE], CipherError> {
    let bytes = match value.len() {
        32 => hex::decode(value).map_err(|_| CipherError::InvalidKeyEncoding)?,
        16 => value.as_bytes().to_vec(),
        other => return Err(CipherError::InvalidKeyLength(other)),
    };
    let mut key = [0_u8; BLOCK_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Keys belonging to one sphere, keyed by the advertisement reference id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SphereKeys {
    pub admin: Option<[u8; BLOCK_SIZE]>,
    pub member: Option<[u8; BLOCK_SIZE]>,
    pub guest: Option<[u8; BLOCK_SIZE]>,
    pub service_data: Option<[u8; BLOCK_SIZE]>,
}

impl SphereKeys {
    pub fn from_strings(
        admin: Option<&str>,
        member: Option<&str>,
        guest: Option<&str>,
        service_data: Option<&str>,
    ) -> Result<Self, CipherError> {
        Ok(Self {
            admin: admin.map(parse_key).transpose()?,
            member: member.map(parse_key).transpose()?,
            guest: guest.map(parse_key).transpose()?,
            service_data: service_data.map(parse_key).transpose()?,
        })
    }

    /// Key for advertisement decryption; older firmware encrypts with the guest key.
    pub fn advertisement_key(&self) -> Option<&[u8; BLOCK_SIZE]> {
        self.service_data.as_ref().or(self.guest.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_ascii_keys() {
        let hex_key = parse_key("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(hex_key[15], 0x0f);
        let ascii_key = parse_key("guestKeyForOther").unwrap();
        assert_eq!(&ascii_key, b"guestKeyForOther");
    }

    #[test]
    fn rejects_wrong_sizes_and_bad_hex() {
        assert_eq!(parse_key("short"), Err(CipherError::InvalidKeyLength(5)));
        assert_eq!(
            parse_key("zz0102030405060708090a0b0c0d0e0f"),
            Err(CipherError::InvalidKeyEncoding)
        );
    }

    #[test]
    fn advertisement_key_falls_back_to_guest() {
        let keys = SphereKeys::from_strings(None, None, Some("guestKeyForOther"), None).unwrap();
        assert_eq!(keys.advertisement_key(), Some(b"guestKeyForOther"));

        let keys = SphereKeys::from_strings(
            None,
            None,
            Some("guestKeyForOther"),
            Some("serviceDataKey!!"),
        )
        .unwrap();
        assert_eq!(keys.advertisement_key(), Some(b"serviceDataKey!!"));
    }
}
