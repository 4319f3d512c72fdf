//! Encrypted key vault.
//!
//! A passive, in-memory store of client key blobs keyed by certificate
//! serial. Records arrive already encrypted (argon2id-derived keys,
//! AES-GCM, encrypt-then-MAC; see `cachet-crypto`); the vault never holds
//! plaintext and never attempts decryption.

pub mod store;

pub use store::{EncryptedKeyRecord, KeyVault, VaultError};
