//! Certificate authority and revocation state for the cachet relay.
//!
//! The relay runs its own CA: a self-signed RSA-4096 root signs short-lived
//! client certificates. Each client certificate carries a *referrer*
//! extension naming the serial of the certificate that authorized its
//! issuance, which makes issued identities a forest. Revoking a node can
//! optionally revoke its whole subtree.
//!
//! - [`authority::CertificateAuthority`]: root bootstrap, CSR signing, and
//!   the relay's own TLS identity
//! - [`revocation::RevocationManager`]: referrer tree plus revoked set
//! - [`identity::PeerIdentity`]: serial and referrer extracted from a peer
//!   certificate during the handshake

pub mod authority;
pub mod error;
pub mod identity;
pub mod revocation;

pub use authority::{CertificateAuthority, ServerIdentity};
pub use error::PkiError;
pub use identity::{PeerIdentity, REFERRER_OID};
pub use revocation::RevocationManager;
