//! Source definitions, loadable from JSON or built from flags

use std::path::Path;

use serde::Deserialize;

use crate::chunker::{AuthMode, WireFormat};
use crate::error::{ConfigError, Result};

/// One upstream stream and the path it is republished under
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Upstream MJPEG URL
    pub source: String,
    pub username: String,
    pub password: String,
    /// Respond to Digest challenges instead of sending Basic preemptively
    pub digest: bool,
    /// Maximum frames per second forwarded downstream, 0 for unlimited
    pub rate: f64,
    /// Accept boundary-less part markers from noncompliant cameras
    pub legacy: bool,
    /// Serve path, e.g. `/front-door`
    pub path: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            username: String::new(),
            password: String::new(),
            digest: false,
            rate: 0.0,
            legacy: false,
            path: "/".to_string(),
        }
    }
}

impl SourceConfig {
    /// Credentials only count when both halves are present
    pub fn auth_mode(&self) -> AuthMode {
        if self.username.is_empty() || self.password.is_empty() {
            return AuthMode::None;
        }
        let username = self.username.clone();
        let password = self.password.clone();
        if self.digest {
            AuthMode::Digest { username, password }
        } else {
            AuthMode::Basic { username, password }
        }
    }

    pub fn wire_format(&self) -> WireFormat {
        if self.legacy {
            WireFormat::Legacy
        } else {
            WireFormat::Multipart
        }
    }

    pub fn rate_limit(&self) -> Option<f64> {
        (self.rate > 0.0).then_some(self.rate)
    }
}

/// Read a JSON array of sources. An empty file yields no sources.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<SourceConfig>> {
    let raw = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let sources: Vec<SourceConfig> = serde_json::from_str(&raw).map_err(ConfigError::Json)?;
    Ok(sources)
}
