//! Runtime configuration for the broker.
//!
//! Built from CLI flags (or their `TXBROKER_*` environment variables) in
//! `main.rs`; tests construct it directly.

use std::ffi::OsString;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::consts::{
    DEFAULT_ENGINE_PATH, DEFAULT_ENGINE_TIMEOUT_SECS, DEFAULT_MAX_JSON_BYTES,
    DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PORT, default_scratch_root,
};

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub listen: SocketAddr,
    pub engine_path: PathBuf,
    /// Placed before the contract arguments on every engine invocation.
    pub engine_args: Vec<OsString>,
    pub scratch_root: PathBuf,
    /// `None` lets the engine run forever.
    pub engine_timeout: Option<Duration>,
    pub max_json_bytes: usize,
    pub max_upload_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            engine_path: PathBuf::from(DEFAULT_ENGINE_PATH),
            engine_args: Vec::new(),
            scratch_root: default_scratch_root(),
            engine_timeout: Some(Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECS)),
            max_json_bytes: DEFAULT_MAX_JSON_BYTES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl BrokerConfig {
    /// Reject settings the broker cannot serve with.
    pub fn validate(&self) -> Result<()> {
        if self.max_json_bytes == 0 {
            bail!("max JSON body size must be greater than zero");
        }
        if self.max_upload_bytes == 0 {
            bail!("max upload size must be greater than zero");
        }
        if self.engine_timeout == Some(Duration::ZERO) {
            bail!("engine timeout must be greater than zero (omit it to disable)");
        }
        // Bare names are resolved through PATH at spawn time.
        if self.engine_path.components().count() > 1 && !self.engine_path.is_file() {
            bail!("engine not found at {}", self.engine_path.display());
        }
        Ok(())
    }
}
