//! Engine configuration.
//!
//! Loaded from YAML, e.g.
//!
//! ```yaml
//! enabled: true
//! device: devices/chrome_l3.wvd
//! license_type: STREAMING
//! session_ttl_secs: 300
//! max_sessions: 64
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::license_protocol::LicenseType;

/// Engine settings. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// When false the engine forwards every payload untouched.
    pub enabled: bool,
    /// Device file loaded at startup.
    #[serde(rename = "device")]
    pub device_path: Option<PathBuf>,
    /// License type requested in forged challenges.
    pub license_type: String,
    /// Seconds a session may wait for its license.
    pub session_ttl_secs: u64,
    /// Upper bound on sessions awaiting a license.
    pub max_sessions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_path: None,
            license_type: LicenseType::Streaming.as_str_name().to_string(),
            session_ttl_secs: 300,
            max_sessions: 64,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        self.license_type()?;
        if self.session_ttl_secs == 0 {
            return Err(Error::Config("session_ttl_secs must be positive".to_string()));
        }
        if self.max_sessions == 0 {
            return Err(Error::Config("max_sessions must be positive".to_string()));
        }
        Ok(())
    }

    pub fn license_type(&self) -> Result<LicenseType> {
        LicenseType::from_str_name(&self.license_type.to_ascii_uppercase())
            .ok_or_else(|| Error::InvalidLicenseType(self.license_type.clone()))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}
