//! In-memory encrypted key records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Errors from vault operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VaultError {
    /// No record exists for the requested certificate ID.
    #[error("key not found for certificate ID")]
    NotFound,

    /// The certificate ID was empty.
    #[error("certificate ID cannot be empty")]
    InvalidCertId,
}

/// One stored key blob.
#[derive(Debug, Clone)]
pub struct EncryptedKeyRecord {
    pub cert_id: String,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub mac: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe map of certificate ID to encrypted key record.
#[derive(Default)]
pub struct KeyVault {
    records: RwLock<HashMap<String, EncryptedKeyRecord>>,
}

impl KeyVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the record for `cert_id`.
    ///
    /// Updates keep the original `created_at` and refresh `updated_at`.
    pub fn store(&self, cert_id: &str, ciphertext: Vec<u8>, iv: Vec<u8>, mac: Vec<u8>) -> Result<(), VaultError> {
        if cert_id.is_empty() {
            return Err(VaultError::InvalidCertId);
        }

        let now = Utc::now();
        let mut records = self.records.write();
        match records.get_mut(cert_id) {
            Some(existing) => {
                existing.ciphertext = ciphertext;
                existing.iv = iv;
                existing.mac = mac;
                existing.updated_at = now;
            }
            None => {
                records.insert(
                    cert_id.to_string(),
                    EncryptedKeyRecord {
                        cert_id: cert_id.to_string(),
                        ciphertext,
                        iv,
                        mac,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }

        Ok(())
    }

    /// Retrieve the record for `cert_id`.
    pub fn get(&self, cert_id: &str) -> Result<EncryptedKeyRecord, VaultError> {
        self.records
            .read()
            .get(cert_id)
            .cloned()
            .ok_or(VaultError::NotFound)
    }

    /// Delete the record for `cert_id`.
    pub fn delete(&self, cert_id: &str) -> Result<(), VaultError> {
        match self.records.write().remove(cert_id) {
            Some(_) => Ok(()),
            None => Err(VaultError::NotFound),
        }
    }

    /// Snapshot of every certificate ID with a stored record.
    pub fn list(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn store_and_get() {
        let vault = KeyVault::new();
        vault.store("serial-1", vec![1, 2, 3], vec![0; 12], vec![0; 32]).unwrap();

        let record = vault.get("serial-1").unwrap();
        assert_eq!(record.cert_id, "serial-1");
        assert_eq!(record.ciphertext, vec![1, 2, 3]);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn get_missing_is_not_found() {
        let vault = KeyVault::new();
        assert!(matches!(vault.get("missing"), Err(VaultError::NotFound)));
    }

    #[test]
    fn empty_cert_id_rejected() {
        let vault = KeyVault::new();
        let result = vault.store("", vec![], vec![], vec![]);
        assert!(matches!(result, Err(VaultError::InvalidCertId)));
    }

    #[test]
    fn upsert_preserves_created_at() {
        let vault = KeyVault::new();
        vault.store("serial-1", vec![1], vec![0; 12], vec![0; 32]).unwrap();
        let first = vault.get("serial-1").unwrap();

        vault.store("serial-1", vec![2], vec![1; 12], vec![1; 32]).unwrap();
        let second = vault.get("serial-1").unwrap();

        assert_eq!(second.ciphertext, vec![2]);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn delete_removes_record() {
        let vault = KeyVault::new();
        vault.store("serial-1", vec![1], vec![0; 12], vec![0; 32]).unwrap();

        vault.delete("serial-1").unwrap();
        assert!(matches!(vault.get("serial-1"), Err(VaultError::NotFound)));
        assert!(matches!(vault.delete("serial-1"), Err(VaultError::NotFound)));
    }

    #[test]
    fn list_snapshots_ids() {
        let vault = KeyVault::new();
        vault.store("a", vec![], vec![], vec![]).unwrap();
        vault.store("b", vec![], vec![], vec![]).unwrap();

        let mut ids = vault.list();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
