//! Cachet cryptographic primitives.
//!
//! Everything the relay and its clients need for protecting stored key
//! material:
//!
//! - **AEAD**: AES-256-GCM with random 96-bit nonces
//! - **KDF**: argon2id deriving a 64-byte block split into an encryption key
//!   and a MAC key
//! - **MAC**: HMAC-SHA256 with constant-time verification
//! - **Envelope**: encrypt-then-MAC over `ciphertext || nonce`, verified
//!   before any decryption is attempted
//!
//! The relay itself never decrypts client payloads; these primitives back
//! the key vault and are shared with client-side tooling.

pub mod aead;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod mac;

pub use aead::{open, seal, NONCE_SIZE};
pub use envelope::{encrypt_and_authenticate, verify_and_decrypt, SealedRecord};
pub use error::CryptoError;
pub use kdf::{derive_key_pair, generate_salt, KeyPair, SALT_SIZE};
pub use mac::{compute_hmac, verify_hmac, MAC_SIZE};
