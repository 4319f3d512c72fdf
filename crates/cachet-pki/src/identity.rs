//! Peer identity extracted from a presented certificate.
//!
//! The TLS layer hands the leaf certificate over as DER; the relay needs
//! exactly two things from it: the serial number (the identity used in
//! revocation state, rendered in decimal to match what the authority
//! registers at issuance) and the referrer extension. The extension value is
//! the referrer's serial as raw ASCII bytes, not a DER string type.

use x509_parser::oid_registry::Oid;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::PkiError;

/// OID of the referrer extension, dotted-decimal form.
pub const REFERRER_OID: &str = "1.3.6.1.4.1.99999.1.1";

const REFERRER_OID_ARCS: [u64; 9] = [1, 3, 6, 1, 4, 1, 99999, 1, 1];

/// Identity facts about an authenticated peer.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    /// Certificate serial number in decimal.
    pub serial: String,
    /// Subject common name, empty when absent.
    pub subject: String,
    /// Serial of the certificate that authorized issuance, when present.
    pub referrer_id: Option<String>,
}

impl PeerIdentity {
    /// Parse a DER-encoded certificate into its identity facts.
    pub fn from_der(der: &[u8]) -> Result<Self, PkiError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::CertificateParse(e.to_string()))?;

        let serial = cert.tbs_certificate.serial.to_string();
        let subject = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();

        let referrer_oid = Oid::from(&REFERRER_OID_ARCS)
            .map_err(|_| PkiError::CertificateParse("invalid referrer OID".to_string()))?;
        let referrer_id = cert
            .extensions()
            .iter()
            .find(|ext| ext.oid == referrer_oid)
            .map(|ext| String::from_utf8_lossy(ext.value).into_owned())
            .filter(|value| !value.is_empty());

        Ok(Self { serial, subject, referrer_id })
    }
}
