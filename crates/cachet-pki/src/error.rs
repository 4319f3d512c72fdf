//! PKI error types.

/// Errors from certificate authority and revocation operations.
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    /// Generating or loading the CA state failed.
    #[error("CA bootstrap failed: {0}")]
    Bootstrap(String),

    /// The submitted CSR could not be parsed or its signature did not verify.
    #[error("Invalid CSR")]
    InvalidCsr,

    /// OpenSSL rejected a certificate operation.
    #[error("Certificate operation failed: {0}")]
    Generation(#[from] openssl::error::ErrorStack),

    /// A peer certificate could not be parsed.
    #[error("Certificate parse error: {0}")]
    CertificateParse(String),

    /// The presented certificate is revoked.
    #[error("certificate is revoked")]
    CertRevoked,

    /// The certificate that referred the presented certificate is revoked.
    #[error("referrer certificate is revoked")]
    ReferrerRevoked,
}
