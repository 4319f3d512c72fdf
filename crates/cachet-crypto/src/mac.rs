//! HMAC-SHA256 computation and constant-time verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 tag size in bytes.
pub const MAC_SIZE: usize = 32;

/// Compute the HMAC-SHA256 tag of `data` under `key`.
pub fn compute_hmac(data: &[u8], key: &[u8]) -> Result<[u8; MAC_SIZE], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: MAC_SIZE,
        actual: key.len(),
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Verify an HMAC-SHA256 tag in constant time.
pub fn verify_hmac(data: &[u8], expected: &[u8], key: &[u8]) -> Result<bool, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: MAC_SIZE,
        actual: key.len(),
    })?;
    mac.update(data);
    Ok(mac.verify_slice(expected).is_ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn compute_and_verify() {
        let key = [0x42u8; 32];
        let tag = compute_hmac(b"payload", &key).unwrap();

        assert!(verify_hmac(b"payload", &tag, &key).unwrap());
        assert!(!verify_hmac(b"other payload", &tag, &key).unwrap());
    }

    #[test]
    fn tampered_tag_rejected() {
        let key = [0x42u8; 32];
        let mut tag = compute_hmac(b"payload", &key).unwrap();
        tag[0] ^= 0x01;

        assert!(!verify_hmac(b"payload", &tag, &key).unwrap());
    }

    #[test]
    fn wrong_key_rejected() {
        let tag = compute_hmac(b"payload", &[0x42u8; 32]).unwrap();
        assert!(!verify_hmac(b"payload", &tag, &[0x43u8; 32]).unwrap());
    }
}
