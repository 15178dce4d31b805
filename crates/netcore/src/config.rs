//! Manager configuration.
//!
//! Mirrors the teacher's `DaemonConfig::load`/`save` pattern: read a TOML
//! file if one exists, otherwise fall back to (and persist) defaults.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};

/// Candidate host-bitted `/24` CIDRs tried in order by `BridgeProvisioner`.
pub const DEFAULT_CANDIDATE_SUBNETS: [(Ipv4Addr, u8); 3] = [
    (Ipv4Addr::new(172, 16, 42, 1), 24),
    (Ipv4Addr::new(10, 0, 42, 1), 24),
    (Ipv4Addr::new(192, 168, 42, 1), 24),
];

/// Ephemeral port range used by [`crate::network::ports::PortAllocator`].
pub const DEFAULT_PORT_RANGE: std::ops::Range<u16> = 49_153..65_535;

/// Manager configuration: bridge name, candidate subnets, and the ephemeral
/// port range the fountain cycles over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Path this config was loaded from, if any (not serialized).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Name of the bridge device to create or reuse.
    pub bridge_name: String,

    /// Host-bitted `gateway/prefix` CIDRs tried in order at bridge creation.
    pub candidate_subnets: Vec<(Ipv4Addr, u8)>,

    /// Start of the ephemeral port range (inclusive).
    pub port_range_start: u16,

    /// End of the ephemeral port range (exclusive).
    pub port_range_end: u16,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            bridge_name: "netcore0".to_string(),
            candidate_subnets: DEFAULT_CANDIDATE_SUBNETS.to_vec(),
            port_range_start: DEFAULT_PORT_RANGE.start,
            port_range_end: DEFAULT_PORT_RANGE.end,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from `path`, or fall back to (and persist)
    /// defaults if the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let mut config: Self = toml::from_str(&content)
                .map_err(|e| NetError::Configuration(e.to_string()))?;
            config.config_path = Some(path.to_path_buf());
            Ok(config)
        } else {
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            config.save()?;
            Ok(config)
        }
    }

    /// Load from the default `$XDG_CONFIG_HOME/netcore/config.toml`
    /// location, creating it with defaults on first run.
    pub fn load_default() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| NetError::Configuration("no config directory for this platform".into()))?
            .join("netcore");
        Self::load(&dir.join("config.toml"))
    }

    /// Persist this configuration to its `config_path`.
    pub fn save(&self) -> Result<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| NetError::Configuration("no config path set".into()))?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| NetError::Configuration(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The ephemeral port range as a `Range<u16>`.
    #[must_use]
    pub fn port_range(&self) -> std::ops::Range<u16> {
        self.port_range_start..self.port_range_end
    }
}
