//! Certificate authority.
//!
//! The CA is bootstrapped once per deployment: if the configured PEM files
//! exist they are loaded, otherwise a fresh RSA-4096 root is generated and
//! persisted (certificate as a `CERTIFICATE` block, key as a PKCS#1
//! `RSA PRIVATE KEY` block). Client certificates are issued against CSRs and
//! carry the referrer extension when issuance was authorized by an existing
//! identity.

use std::path::Path;

use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509, X509Name, X509Ref, X509Req};
use tracing::info;

use crate::error::PkiError;
use crate::identity::REFERRER_OID;

const X509_VERSION_3: i32 = 2;
const CA_KEY_BITS: u32 = 4096;
const SERVER_KEY_BITS: u32 = 2048;
const SERIAL_BITS: i32 = 128;
const CA_VALIDITY_DAYS: u32 = 3650;
const CA_PATH_LENGTH: u32 = 1;

/// DER material for the relay's own TLS identity.
pub struct ServerIdentity {
    /// Leaf certificate followed by the CA certificate.
    pub cert_chain_der: Vec<Vec<u8>>,
    /// PKCS#8-encoded private key for the leaf.
    pub key_pkcs8_der: Vec<u8>,
}

/// The relay's certificate authority.
pub struct CertificateAuthority {
    ca_cert: X509,
    ca_key: PKey<Private>,
    organization: String,
}

impl CertificateAuthority {
    /// Load the CA from disk, generating and persisting a new root when
    /// either file is missing.
    pub fn bootstrap(cert_path: &Path, key_path: &Path, organization: &str) -> Result<Self, PkiError> {
        let (ca_cert, ca_key) = if cert_path.exists() && key_path.exists() {
            let cert_pem = std::fs::read(cert_path)
                .map_err(|e| PkiError::Bootstrap(format!("reading {}: {e}", cert_path.display())))?;
            let key_pem = std::fs::read(key_path)
                .map_err(|e| PkiError::Bootstrap(format!("reading {}: {e}", key_path.display())))?;

            let cert = X509::from_pem(&cert_pem)
                .map_err(|e| PkiError::Bootstrap(format!("parsing CA certificate: {e}")))?;
            let rsa = Rsa::private_key_from_pem(&key_pem)
                .map_err(|e| PkiError::Bootstrap(format!("parsing CA key: {e}")))?;
            let key = PKey::from_rsa(rsa)
                .map_err(|e| PkiError::Bootstrap(format!("loading CA key: {e}")))?;

            info!(cert = %cert_path.display(), "Loaded existing CA");
            (cert, key)
        } else {
            let (cert, key) = generate_ca(organization)
                .map_err(|e| PkiError::Bootstrap(format!("generating CA: {e}")))?;
            persist_ca(&cert, &key, cert_path, key_path)?;

            info!(cert = %cert_path.display(), organization, "Generated new CA");
            (cert, key)
        };

        Ok(Self { ca_cert, ca_key, organization: organization.to_string() })
    }

    /// The root certificate, for peer validation.
    pub fn ca_certificate(&self) -> &X509Ref {
        &self.ca_cert
    }

    /// DER encoding of the root certificate.
    pub fn ca_certificate_der(&self) -> Result<Vec<u8>, PkiError> {
        Ok(self.ca_cert.to_der()?)
    }

    /// Organization name carried into every issued certificate.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Sign a DER-encoded CSR into a client certificate.
    ///
    /// The subject common name is copied from the CSR; a non-empty
    /// `referrer_id` is recorded in the referrer extension as raw ASCII
    /// bytes.
    ///
    /// # Errors
    ///
    /// `InvalidCsr` when the CSR cannot be parsed or its self-signature does
    /// not verify.
    pub fn sign_csr(&self, csr_der: &[u8], referrer_id: &str, validity_days: u32) -> Result<X509, PkiError> {
        let csr = X509Req::from_der(csr_der).map_err(|_| PkiError::InvalidCsr)?;
        let csr_pubkey = csr.public_key().map_err(|_| PkiError::InvalidCsr)?;
        if !csr.verify(&csr_pubkey).map_err(|_| PkiError::InvalidCsr)? {
            return Err(PkiError::InvalidCsr);
        }

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;

        let mut name = X509Name::builder()?;
        if let Some(cn) = csr.subject_name().entries_by_nid(Nid::COMMONNAME).next() {
            name.append_entry_by_nid(Nid::COMMONNAME, &cn.data().as_utf8()?)?;
        }
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.organization)?;
        let name = name.build();

        builder.set_subject_name(&name)?;
        builder.set_issuer_name(self.ca_cert.subject_name())?;
        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(validity_days)?;
        builder.set_not_after(&not_after)?;
        builder.set_pubkey(&csr_pubkey)?;

        builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;
        builder.append_extension(ExtendedKeyUsage::new().client_auth().build()?)?;

        if !referrer_id.is_empty() {
            builder.append_extension(referrer_extension(referrer_id)?)?;
        }

        builder.sign(&self.ca_key, MessageDigest::sha256())?;
        Ok(builder.build())
    }

    /// Issue the relay's own TLS server certificate, signed by the CA.
    pub fn issue_server_identity(&self, hostnames: &[&str], validity_days: u32) -> Result<ServerIdentity, PkiError> {
        let rsa = Rsa::generate(SERVER_KEY_BITS)?;
        let key = PKey::from_rsa(rsa)?;

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;

        let mut name = X509Name::builder()?;
        name.append_entry_by_nid(Nid::COMMONNAME, &format!("{} Relay", self.organization))?;
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.organization)?;
        let name = name.build();

        builder.set_subject_name(&name)?;
        builder.set_issuer_name(self.ca_cert.subject_name())?;
        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(validity_days)?;
        builder.set_not_after(&not_after)?;
        builder.set_pubkey(&key)?;

        builder.append_extension(KeyUsage::new().critical().digital_signature().key_encipherment().build()?)?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;

        let mut san = SubjectAlternativeName::new();
        for host in hostnames {
            if host.parse::<std::net::IpAddr>().is_ok() {
                san.ip(host);
            } else {
                san.dns(host);
            }
        }
        let san = san.build(&builder.x509v3_context(Some(&self.ca_cert), None))?;
        builder.append_extension(san)?;

        builder.sign(&self.ca_key, MessageDigest::sha256())?;
        let leaf = builder.build();

        Ok(ServerIdentity {
            cert_chain_der: vec![leaf.to_der()?, self.ca_cert.to_der()?],
            key_pkcs8_der: key.private_key_to_pkcs8()?,
        })
    }
}

/// Render a certificate's serial number as the decimal string used
/// throughout the revocation state.
pub fn serial_decimal(cert: &X509Ref) -> Result<String, PkiError> {
    Ok(cert.serial_number().to_bn()?.to_dec_str()?.to_string())
}

fn random_serial() -> Result<openssl::asn1::Asn1Integer, PkiError> {
    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}

fn referrer_extension(referrer_id: &str) -> Result<openssl::x509::X509Extension, PkiError> {
    let oid = Asn1Object::from_str(REFERRER_OID)?;
    let value = Asn1OctetString::new_from_bytes(referrer_id.as_bytes())?;
    Ok(openssl::x509::X509Extension::new_from_der(&oid, false, &value)?)
}

fn generate_ca(organization: &str) -> Result<(X509, PKey<Private>), PkiError> {
    let rsa = Rsa::generate(CA_KEY_BITS)?;
    let key = PKey::from_rsa(rsa)?;

    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;
    let serial = random_serial()?;
    builder.set_serial_number(&serial)?;

    let mut name = X509Name::builder()?;
    name.append_entry_by_nid(Nid::COMMONNAME, "Cachet CA")?;
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization)?;
    let name = name.build();

    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(CA_VALIDITY_DAYS)?;
    builder.set_not_after(&not_after)?;
    builder.set_pubkey(&key)?;

    let mut constraints = BasicConstraints::new();
    constraints.critical().ca().pathlen(CA_PATH_LENGTH);
    builder.append_extension(constraints.build()?)?;
    builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build()?)?;

    builder.sign(&key, MessageDigest::sha256())?;
    Ok((builder.build(), key))
}

fn persist_ca(cert: &X509, key: &PKey<Private>, cert_path: &Path, key_path: &Path) -> Result<(), PkiError> {
    if let Some(parent) = cert_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PkiError::Bootstrap(format!("creating {}: {e}", parent.display())))?;
    }
    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PkiError::Bootstrap(format!("creating {}: {e}", parent.display())))?;
    }

    let cert_pem = cert.to_pem()?;
    std::fs::write(cert_path, cert_pem)
        .map_err(|e| PkiError::Bootstrap(format!("writing {}: {e}", cert_path.display())))?;

    let key_pem = key.rsa()?.private_key_to_pem()?;
    std::fs::write(key_path, key_pem)
        .map_err(|e| PkiError::Bootstrap(format!("writing {}: {e}", key_path.display())))?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::PeerIdentity;
    use openssl::x509::X509ReqBuilder;

    fn test_csr(common_name: &str) -> (Vec<u8>, PKey<Private>) {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut builder = X509ReqBuilder::new().unwrap();
        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
        builder.set_subject_name(&name.build()).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        (builder.build().to_der().unwrap(), key)
    }

    fn test_authority(dir: &Path) -> CertificateAuthority {
        CertificateAuthority::bootstrap(&dir.join("ca.crt"), &dir.join("ca.key"), "Cachet Test")
            .unwrap()
    }

    #[test]
    fn bootstrap_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.crt");
        let key_path = dir.path().join("ca.key");

        let first = CertificateAuthority::bootstrap(&cert_path, &key_path, "Cachet Test").unwrap();
        assert!(cert_path.exists());
        assert!(key_path.exists());

        let key_pem = std::fs::read_to_string(&key_path).unwrap();
        assert!(key_pem.contains("BEGIN RSA PRIVATE KEY"));

        let second = CertificateAuthority::bootstrap(&cert_path, &key_path, "Cachet Test").unwrap();
        assert_eq!(
            serial_decimal(first.ca_certificate()).unwrap(),
            serial_decimal(second.ca_certificate()).unwrap(),
        );
    }

    #[test]
    fn sign_csr_copies_subject_and_organization() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_authority(dir.path());
        let (csr_der, _) = test_csr("client-a");

        let cert = ca.sign_csr(&csr_der, "", 90).unwrap();

        let cn = cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(cn, "client-a");

        let org = cert
            .subject_name()
            .entries_by_nid(Nid::ORGANIZATIONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(org, "Cachet Test");
    }

    #[test]
    fn signed_csr_carries_referrer_extension() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_authority(dir.path());
        let (csr_der, _) = test_csr("client-b");

        let cert = ca.sign_csr(&csr_der, "123456789", 90).unwrap();
        let identity = PeerIdentity::from_der(&cert.to_der().unwrap()).unwrap();

        assert_eq!(identity.referrer_id.as_deref(), Some("123456789"));
        assert_eq!(identity.serial, serial_decimal(&cert).unwrap());
    }

    #[test]
    fn bootstrap_certificate_has_no_referrer() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_authority(dir.path());
        let (csr_der, _) = test_csr("client-c");

        let cert = ca.sign_csr(&csr_der, "", 90).unwrap();
        let identity = PeerIdentity::from_der(&cert.to_der().unwrap()).unwrap();

        assert!(identity.referrer_id.is_none());
    }

    #[test]
    fn garbage_csr_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_authority(dir.path());

        let result = ca.sign_csr(b"not a csr", "", 90);
        assert!(matches!(result, Err(PkiError::InvalidCsr)));
    }

    #[test]
    fn csr_with_foreign_signature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_authority(dir.path());

        // CSR signed with a key that does not match the embedded public key.
        let signing_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let embedded_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut builder = X509ReqBuilder::new().unwrap();
        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "mismatch").unwrap();
        builder.set_subject_name(&name.build()).unwrap();
        builder.set_pubkey(&embedded_key).unwrap();
        builder.sign(&signing_key, MessageDigest::sha256()).unwrap();
        let req = builder.build().to_der().unwrap();

        let result = ca.sign_csr(&req, "", 90);
        assert!(matches!(result, Err(PkiError::InvalidCsr)));
    }

    #[test]
    fn server_identity_chains_to_ca() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_authority(dir.path());

        let identity = ca.issue_server_identity(&["localhost", "127.0.0.1"], 365).unwrap();
        assert_eq!(identity.cert_chain_der.len(), 2);

        let leaf = X509::from_der(&identity.cert_chain_der[0]).unwrap();
        let ca_pub = ca.ca_certificate().public_key().unwrap();
        assert!(leaf.verify(&ca_pub).unwrap());
    }
}
