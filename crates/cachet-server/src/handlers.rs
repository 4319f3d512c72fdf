//! HTTP endpoints.
//!
//! All routes are served over the mutually-authenticated listener. The
//! negotiated peer certificate (when one was presented) arrives as a
//! [`ClientCert`] extension injected per connection; `/health`, `/api/info`
//! and `/api/certificate/request` are the only routes that accept
//! unauthenticated peers, the latter being the bootstrap path for
//! first-time certificate issuance.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, State, WebSocketUpgrade};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cachet_bins::message::base64_bytes;
use cachet_bins::BinManager;
use cachet_pki::{CertificateAuthority, PeerIdentity, PkiError, RevocationManager};
use cachet_vault::{KeyVault, VaultError};

use crate::client;
use crate::error::ApiError;

/// Validity of issued client certificates.
const CLIENT_CERT_VALIDITY_DAYS: u32 = 90;

/// Shared state behind every handler.
pub struct AppState {
    pub bins: Arc<BinManager>,
    pub revocation: Arc<RevocationManager>,
    pub authority: Arc<CertificateAuthority>,
    pub vault: Arc<KeyVault>,
    /// Flipped to `true` when the process is shutting down; connection
    /// loops watch it.
    pub shutdown: watch::Receiver<bool>,
}

/// Peer certificate facts for the current connection, absent for
/// unauthenticated (bootstrap) peers.
#[derive(Clone)]
pub struct ClientCert(pub Option<PeerIdentity>);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/info", get(server_info))
        .route("/ws", get(ws_upgrade))
        .route("/api/certificate/request", post(certificate_request))
        .route("/api/certificate/revoke", post(certificate_revoke))
        .route("/api/key/store", post(key_store))
        .route("/api/key/retrieve", post(key_retrieve))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn server_info(
    State(state): State<Arc<AppState>>,
    Extension(ClientCert(identity)): Extension<ClientCert>,
) -> Json<Value> {
    if let Some(identity) = &identity {
        debug!(subject = %identity.subject, "Server info requested");
    }

    Json(json!({
        "bin_mask": format!("0x{:X}", state.bins.current_mask().await),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "message_retention_hours": state.bins.retention_hours(),
    }))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(ClientCert(identity)): Extension<ClientCert>,
) -> Result<Response, ApiError> {
    let identity = identity.ok_or_else(ApiError::certificate_required)?;
    Ok(ws.on_upgrade(move |socket| client::run(socket, state, identity)))
}

/// Sign a DER-encoded CSR. The referrer recorded in the new certificate is
/// the authenticating client's serial; a bootstrap request has none.
async fn certificate_request(
    State(state): State<Arc<AppState>>,
    Extension(ClientCert(identity)): Extension<ClientCert>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let referrer_id = identity.map(|id| id.serial).unwrap_or_default();

    let cert = state
        .authority
        .sign_csr(&body, &referrer_id, CLIENT_CERT_VALIDITY_DAYS)
        .map_err(|err| match err {
            PkiError::InvalidCsr => ApiError::new(StatusCode::BAD_REQUEST, "Invalid CSR"),
            other => {
                error!(error = %other, "CSR signing failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to sign CSR")
            }
        })?;

    let serial = cachet_pki::authority::serial_decimal(&cert).map_err(|err| {
        error!(error = %err, "Reading serial of issued certificate failed");
        ApiError::internal()
    })?;
    state.revocation.register(&serial, &referrer_id);

    info!(serial = %serial, referrer = %referrer_id, "Issued client certificate");

    let der = cert.to_der().map_err(|err| {
        error!(error = %err, "Encoding issued certificate failed");
        ApiError::internal()
    })?;
    Ok(([(header::CONTENT_TYPE, "application/pkix-cert")], der).into_response())
}

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    certificate_id: String,
    #[serde(default)]
    revoke_children: bool,
}

/// Revoke a certificate. A client may revoke itself or any certificate it
/// referred.
async fn certificate_revoke(
    State(state): State<Arc<AppState>>,
    Extension(ClientCert(identity)): Extension<ClientCert>,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<Value>, ApiError> {
    let identity = identity.ok_or_else(ApiError::certificate_required)?;
    let target = request.certificate_id;

    let authorized =
        target == identity.serial || state.revocation.is_referrer_of(&identity.serial, &target);
    if !authorized {
        warn!(caller = %identity.serial, target = %target, "Rejected revocation request");
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Unauthorized to revoke this certificate",
        ));
    }

    if request.revoke_children {
        state.revocation.revoke_with_children(&target);
    } else {
        state.revocation.revoke(&target);
    }
    info!(caller = %identity.serial, target = %target, with_children = request.revoke_children, "Certificate revoked");

    Ok(Json(json!({
        "status": "success",
        "certificate_id": target,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

#[derive(Debug, Deserialize)]
struct KeyStoreRequest {
    #[serde(with = "base64_bytes")]
    encrypted_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    hmac: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct KeyRecordResponse {
    cert_id: String,
    #[serde(with = "base64_bytes")]
    encrypted_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    hmac: Vec<u8>,
    created_at: String,
    updated_at: String,
}

/// Store the caller's encrypted key blob, keyed by its certificate serial.
async fn key_store(
    State(state): State<Arc<AppState>>,
    Extension(ClientCert(identity)): Extension<ClientCert>,
    Json(request): Json<KeyStoreRequest>,
) -> Result<Json<Value>, ApiError> {
    let identity = identity.ok_or_else(ApiError::certificate_required)?;

    state
        .vault
        .store(&identity.serial, request.encrypted_key, request.iv, request.hmac)
        .map_err(vault_error)?;

    info!(serial = %identity.serial, "Stored encrypted key");
    Ok(Json(json!({ "status": "success" })))
}

/// Retrieve the caller's encrypted key blob.
async fn key_retrieve(
    State(state): State<Arc<AppState>>,
    Extension(ClientCert(identity)): Extension<ClientCert>,
) -> Result<Json<KeyRecordResponse>, ApiError> {
    let identity = identity.ok_or_else(ApiError::certificate_required)?;

    let record = state.vault.get(&identity.serial).map_err(vault_error)?;
    Ok(Json(KeyRecordResponse {
        cert_id: record.cert_id,
        encrypted_key: record.ciphertext,
        iv: record.iv,
        hmac: record.mac,
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }))
}

fn vault_error(err: VaultError) -> ApiError {
    match err {
        VaultError::NotFound => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
        VaultError::InvalidCertId => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()),
    }
}
