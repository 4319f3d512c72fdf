//! Encrypt-then-MAC envelope over AES-256-GCM.
//!
//! The MAC covers `ciphertext || nonce` and is keyed independently of the
//! encryption key, so a stored record cannot be swapped, truncated, or
//! re-noncified without detection. Verification always precedes decryption.

use crate::aead::{self, NONCE_SIZE};
use crate::error::CryptoError;
use crate::kdf::KeyPair;
use crate::mac::{self, MAC_SIZE};

/// An authenticated ciphertext as stored in the key vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRecord {
    /// AES-256-GCM ciphertext (tag appended).
    pub ciphertext: Vec<u8>,
    /// GCM nonce.
    pub iv: [u8; NONCE_SIZE],
    /// HMAC-SHA256 over `ciphertext || iv`.
    pub mac: [u8; MAC_SIZE],
}

impl SealedRecord {
    /// Reassemble a record from wire-format parts, validating lengths.
    pub fn from_parts(ciphertext: Vec<u8>, iv: &[u8], mac: &[u8]) -> Result<Self, CryptoError> {
        let iv: [u8; NONCE_SIZE] = iv.try_into().map_err(|_| CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: iv.len(),
        })?;
        let mac: [u8; MAC_SIZE] = mac.try_into().map_err(|_| CryptoError::InvalidMacLength {
            expected: MAC_SIZE,
            actual: mac.len(),
        })?;
        Ok(Self { ciphertext, iv, mac })
    }
}

/// Encrypt `data` and authenticate the result.
pub fn encrypt_and_authenticate(data: &[u8], keys: &KeyPair) -> Result<SealedRecord, CryptoError> {
    let (ciphertext, iv) = aead::seal(data, &keys.encryption_key)?;
    let mac = mac::compute_hmac(&mac_input(&ciphertext, &iv), &keys.mac_key)?;
    Ok(SealedRecord { ciphertext, iv, mac })
}

/// Verify a record's MAC in constant time, then decrypt it.
///
/// # Errors
///
/// `MacMismatch` when the tag does not verify (decryption is never
/// attempted), `DecryptFailed` when GCM rejects the ciphertext.
pub fn verify_and_decrypt(record: &SealedRecord, keys: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    let verified = mac::verify_hmac(
        &mac_input(&record.ciphertext, &record.iv),
        &record.mac,
        &keys.mac_key,
    )?;
    if !verified {
        return Err(CryptoError::MacMismatch);
    }

    aead::open(&record.ciphertext, &record.iv, &keys.encryption_key)
}

fn mac_input(ciphertext: &[u8], iv: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(ciphertext.len() + iv.len());
    input.extend_from_slice(ciphertext);
    input.extend_from_slice(iv);
    input
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::kdf::{derive_key_pair, SALT_SIZE};

    const SALT: [u8; SALT_SIZE] = [9u8; SALT_SIZE];

    #[test]
    fn envelope_roundtrip() {
        let keys = derive_key_pair("p", &SALT).unwrap();
        let data = b"client signing key";

        let record = encrypt_and_authenticate(data, &keys).unwrap();
        let decrypted = verify_and_decrypt(&record, &keys).unwrap();

        assert_eq!(decrypted, data);
    }

    #[test]
    fn wrong_password_is_mac_mismatch() {
        let keys = derive_key_pair("p", &SALT).unwrap();
        let record = encrypt_and_authenticate(b"data", &keys).unwrap();

        let other = derive_key_pair("p2", &SALT).unwrap();
        let result = verify_and_decrypt(&record, &other);
        assert!(matches!(result, Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn tampered_ciphertext_is_detected() {
        let keys = derive_key_pair("p", &SALT).unwrap();
        let mut record = encrypt_and_authenticate(b"data", &keys).unwrap();
        record.ciphertext[0] ^= 0x01;

        assert!(matches!(verify_and_decrypt(&record, &keys), Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn tampered_iv_is_detected() {
        let keys = derive_key_pair("p", &SALT).unwrap();
        let mut record = encrypt_and_authenticate(b"data", &keys).unwrap();
        record.iv[0] ^= 0x01;

        assert!(matches!(verify_and_decrypt(&record, &keys), Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn tampered_mac_is_detected() {
        let keys = derive_key_pair("p", &SALT).unwrap();
        let mut record = encrypt_and_authenticate(b"data", &keys).unwrap();
        record.mac[0] ^= 0x01;

        assert!(matches!(verify_and_decrypt(&record, &keys), Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn from_parts_validates_lengths() {
        let keys = derive_key_pair("p", &SALT).unwrap();
        let record = encrypt_and_authenticate(b"data", &keys).unwrap();

        let ok = SealedRecord::from_parts(record.ciphertext.clone(), &record.iv, &record.mac);
        assert!(ok.is_ok());

        let bad_iv = SealedRecord::from_parts(record.ciphertext.clone(), &[0u8; 4], &record.mac);
        assert!(matches!(bad_iv, Err(CryptoError::InvalidNonceLength { .. })));

        let bad_mac = SealedRecord::from_parts(record.ciphertext, &record.iv, &[0u8; 8]);
        assert!(matches!(bad_mac, Err(CryptoError::InvalidMacLength { .. })));
    }
}
