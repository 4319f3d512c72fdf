//! Password-based key derivation.
//!
//! argon2id produces a single 64-byte block per `(password, salt)` pair; the
//! first half keys AES-256-GCM, the second half keys HMAC-SHA256. Deriving
//! is deliberately expensive (64 MiB, 4 lanes) and should be treated as a
//! blocking operation by async callers.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::aead::KEY_SIZE;
use crate::error::CryptoError;

/// Salt size in bytes.
pub const SALT_SIZE: usize = 16;

const ARGON2_TIME_COST: u32 = 1;
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_LANES: u32 = 4;
const DERIVED_LEN: usize = 2 * KEY_SIZE;

/// Encryption and MAC keys derived from one password.
///
/// Both keys are wiped when the pair is dropped.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct KeyPair {
    /// AES-256 encryption key.
    pub encryption_key: [u8; KEY_SIZE],
    /// HMAC-SHA256 key.
    pub mac_key: [u8; KEY_SIZE],
}

/// Derive a [`KeyPair`] from a password and salt using argon2id.
pub fn derive_key_pair(password: &str, salt: &[u8]) -> Result<KeyPair, CryptoError> {
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_TIME_COST, ARGON2_LANES, Some(DERIVED_LEN))
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut derived = [0u8; DERIVED_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut derived)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    let mut encryption_key = [0u8; KEY_SIZE];
    let mut mac_key = [0u8; KEY_SIZE];
    encryption_key.copy_from_slice(&derived[..KEY_SIZE]);
    mac_key.copy_from_slice(&derived[KEY_SIZE..]);
    derived.zeroize();

    Ok(KeyPair { encryption_key, mac_key })
}

/// Generate a random salt for key derivation.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}
