//! TLS configuration and the client-certificate verification hook.
//!
//! The relay terminates TLS 1.3 itself with an identity issued by its own
//! CA. Client certificates are validated against that CA; after chain
//! validation the hook checks revocation state for both the leaf and its
//! referrer. Connections without a client certificate are admitted at the
//! handshake so first-time clients can reach the certificate-request
//! endpoint; every other endpoint rejects them.

use std::sync::Arc;

use cachet_pki::{CertificateAuthority, PeerIdentity, PkiError, RevocationManager};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};

use crate::error::ServerError;

const SERVER_CERT_VALIDITY_DAYS: u32 = 365;

/// Build the rustls server configuration: TLS 1.3 only, CA-anchored client
/// verification with the revocation hook, and a freshly issued server
/// identity.
pub fn server_tls_config(
    authority: &CertificateAuthority,
    revocation: Arc<RevocationManager>,
    hostnames: &[&str],
) -> Result<Arc<rustls::ServerConfig>, ServerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let verifier = revocation_checking_verifier(authority, revocation, provider.clone())?;

    let identity = authority.issue_server_identity(hostnames, SERVER_CERT_VALIDITY_DAYS)?;
    let chain: Vec<CertificateDer<'static>> = identity
        .cert_chain_der
        .into_iter()
        .map(CertificateDer::from)
        .collect();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key_pkcs8_der));

    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| ServerError::Tls(format!("protocol selection: {e}")))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .map_err(|e| ServerError::Tls(format!("installing server identity: {e}")))?;

    Ok(Arc::new(config))
}

/// The verification hook: WebPKI chain validation against the relay CA,
/// then revocation checks on the leaf serial and its referrer extension.
pub fn revocation_checking_verifier(
    authority: &CertificateAuthority,
    revocation: Arc<RevocationManager>,
    provider: Arc<rustls::crypto::CryptoProvider>,
) -> Result<Arc<dyn ClientCertVerifier>, ServerError> {
    let mut roots = RootCertStore::empty();
    roots
        .add(CertificateDer::from(authority.ca_certificate_der()?))
        .map_err(|e| ServerError::Tls(format!("installing CA root: {e}")))?;

    let webpki = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
        .allow_unauthenticated()
        .build()
        .map_err(|e| ServerError::Tls(format!("building client verifier: {e}")))?;

    Ok(Arc::new(RevocationCheckingVerifier { inner: webpki, revocation }))
}

#[derive(Debug)]
struct RevocationCheckingVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    revocation: Arc<RevocationManager>,
}

impl ClientCertVerifier for RevocationCheckingVerifier {
    fn offer_client_auth(&self) -> bool {
        self.inner.offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.inner.client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let verified = self.inner.verify_client_cert(end_entity, intermediates, now)?;

        let identity = PeerIdentity::from_der(end_entity.as_ref())
            .map_err(|e| rustls::Error::General(e.to_string()))?;

        if self.revocation.is_revoked(&identity.serial) {
            return Err(rustls::Error::General(PkiError::CertRevoked.to_string()));
        }
        if let Some(referrer) = &identity.referrer_id {
            if self.revocation.is_revoked(referrer) {
                return Err(rustls::Error::General(PkiError::ReferrerRevoked.to_string()));
            }
        }

        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cachet_pki::authority::serial_decimal;
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Name, X509ReqBuilder};

    fn client_cert_der(ca: &CertificateAuthority, cn: &str, referrer: &str) -> (Vec<u8>, String) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut builder = X509ReqBuilder::new().unwrap();
        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        builder.set_subject_name(&name.build()).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        let cert = ca.sign_csr(&builder.build().to_der().unwrap(), referrer, 90).unwrap();
        let serial = serial_decimal(&cert).unwrap();
        (cert.to_der().unwrap(), serial)
    }

    fn hook_under_test(
        ca: &CertificateAuthority,
        revocation: Arc<RevocationManager>,
    ) -> Arc<dyn ClientCertVerifier> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        revocation_checking_verifier(ca, revocation, provider).unwrap()
    }

    #[test]
    fn hook_accepts_valid_and_rejects_revoked() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::bootstrap(
            &dir.path().join("ca.crt"),
            &dir.path().join("ca.key"),
            "Cachet Test",
        )
        .unwrap();
        let revocation = Arc::new(RevocationManager::new());
        let verifier = hook_under_test(&ca, Arc::clone(&revocation));

        // Bootstrap certificate: no referrer extension, accepted as-is.
        let (root_der, root_serial) = client_cert_der(&ca, "root-client", "");
        let root_cert = CertificateDer::from(root_der);
        assert!(verifier
            .verify_client_cert(&root_cert, &[], UnixTime::now())
            .is_ok());

        // Child referred by the root client.
        let (child_der, child_serial) = client_cert_der(&ca, "child-client", &root_serial);
        revocation.register(&child_serial, &root_serial);
        let child_cert = CertificateDer::from(child_der);
        assert!(verifier
            .verify_client_cert(&child_cert, &[], UnixTime::now())
            .is_ok());

        // Revoking the leaf rejects the leaf.
        revocation.revoke(&child_serial);
        let err = verifier
            .verify_client_cert(&child_cert, &[], UnixTime::now())
            .unwrap_err();
        assert!(err.to_string().contains("revoked"));

        // Revoking the referrer rejects certificates that name it, even if
        // the leaf itself was never revoked.
        let (second_child_der, _) = client_cert_der(&ca, "second-child", &root_serial);
        let second_child = CertificateDer::from(second_child_der);
        assert!(verifier
            .verify_client_cert(&second_child, &[], UnixTime::now())
            .is_ok());

        revocation.revoke(&root_serial);
        let err = verifier
            .verify_client_cert(&second_child, &[], UnixTime::now())
            .unwrap_err();
        assert!(err.to_string().contains("referrer"));

        // And the root itself is now rejected too.
        assert!(verifier
            .verify_client_cert(&root_cert, &[], UnixTime::now())
            .is_err());
    }

    #[test]
    fn hook_rejects_certificates_from_foreign_ca() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::bootstrap(
            &dir.path().join("ca.crt"),
            &dir.path().join("ca.key"),
            "Cachet Test",
        )
        .unwrap();
        let other_ca = CertificateAuthority::bootstrap(
            &dir.path().join("other.crt"),
            &dir.path().join("other.key"),
            "Other Org",
        )
        .unwrap();

        let verifier = hook_under_test(&ca, Arc::new(RevocationManager::new()));
        let (foreign_der, _) = client_cert_der(&other_ca, "stranger", "");
        let foreign = CertificateDer::from(foreign_der);

        assert!(verifier
            .verify_client_cert(&foreign, &[], UnixTime::now())
            .is_err());
    }
}
