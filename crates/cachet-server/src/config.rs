//! Server configuration.
//!
//! Loaded from a YAML file; a missing file falls back to built-in defaults
//! so a bare `cachet-server` starts a self-contained instance. Hex masks and
//! duration strings are kept verbatim in the parsed structure and validated
//! by the accessor methods.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ServerError;

/// Complete server configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub ca: CaSection,
    pub bin_manager: BinManagerSection,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub address: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { address: "0.0.0.0".to_string(), port: 8443 }
    }
}

/// Certificate authority state on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaSection {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub organization: String,
}

impl Default for CaSection {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("certs/ca.crt"),
            key_path: PathBuf::from("certs/ca.key"),
            organization: "Cachet".to_string(),
        }
    }
}

/// Bin partitioning settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinManagerSection {
    /// Hex mask string, e.g. `"0xFFFFFFFFFFFFF000"`.
    pub initial_mask: String,
    /// Retention window as a duration string, e.g. `"24h"`.
    pub message_retention: String,
}

impl Default for BinManagerSection {
    fn default() -> Self {
        Self {
            initial_mask: "0xFFFFFFFFFFFFF000".to_string(),
            message_retention: "24h".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, using defaults when the file is
    /// absent.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("reading {}: {e}", path.display())))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| ServerError::Config(format!("parsing {}: {e}", path.display())))
    }
}

impl ServerSection {
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid listen address: {e}")))
    }
}

impl BinManagerSection {
    pub fn initial_mask(&self) -> Result<u64, ServerError> {
        let digits = self
            .initial_mask
            .strip_prefix("0x")
            .or_else(|| self.initial_mask.strip_prefix("0X"))
            .unwrap_or(&self.initial_mask);
        u64::from_str_radix(digits, 16)
            .map_err(|e| ServerError::Config(format!("invalid bin mask '{}': {e}", self.initial_mask)))
    }

    pub fn message_retention(&self) -> Result<Duration, ServerError> {
        humantime::parse_duration(&self.message_retention).map_err(|e| {
            ServerError::Config(format!("invalid retention '{}': {e}", self.message_retention))
        })
    }
}
