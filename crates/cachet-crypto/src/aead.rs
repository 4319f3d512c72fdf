//! AES-256-GCM sealing and opening.
//!
//! Nonces are always freshly drawn from the OS CSPRNG; callers persist the
//! nonce alongside the ciphertext and present both when opening.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// Returns `(ciphertext, nonce)`; the GCM tag is appended to the
/// ciphertext.
pub fn seal(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> Result<(Vec<u8>, [u8; NONCE_SIZE]), CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = generate_nonce();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;

    Ok((ciphertext, nonce))
}

/// Decrypt `ciphertext` under `key` and `nonce`.
///
/// # Errors
///
/// `InvalidNonceLength` when the nonce is not 96 bits, `DecryptFailed` when
/// the tag does not verify.
pub fn open(ciphertext: &[u8], nonce: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Generate a random 96-bit nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
