//! Cachet relay server library.
//!
//! Wiring for the relay binary:
//! - mTLS listener with the revocation verification hook (`tls`, `server`)
//! - HTTP endpoints for certificates, keys, and liveness (`handlers`)
//! - the per-connection streaming session (`client`, `proto`)
//! - YAML configuration (`config`)

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod proto;
pub mod server;
pub mod tls;

pub use config::Config;
pub use error::ServerError;
pub use handlers::{AppState, ClientCert};
pub use server::Server;
