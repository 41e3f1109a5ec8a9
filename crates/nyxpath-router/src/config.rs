// ============================================
// File: crates/nyxpath-router/src/config.rs
// ============================================
//! # Router Configuration
//!
//! ## Creation Reason
//! Configuration for a path router, loaded from a TOML file.
//!
//! ## Configuration Sections
//! - `router`: listen address and identity key file
//! - `paths`: shape and count of the circuits this router keeps
//! - `transit`: relay limits and sweep cadence
//! - `exit`: exit policy for circuits ending here
//! - `peers`: static neighbour table
//! - `logging`: log level
//!
//! ## Example Configuration
//! ```toml
//! [router]
//! listen_addr = "0.0.0.0:1090"
//! key_file = "/etc/nyxpath/identity.json"
//!
//! [paths]
//! hops = 3
//! paths = 2
//! lifetime_secs = 600
//!
//! [transit]
//! max_transit_hops = 4096
//!
//! [exit]
//! allow_exit = true
//! permit_internet = false
//!
//! [[peers]]
//! router_id = "5f1c...e2"
//! addr = "10.0.0.2:1090"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Changes need a restart
//! - `paths.hops` is bounded by `MAX_HOPS`
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use nyxpath_common::RouterId;

use crate::error::{Result, RouterError};
use crate::path::{PathSetConfig, MAX_HOPS};
use crate::services::ExitPolicy;

// ============================================
// RouterConfig
// ============================================

/// Main router configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub router: RouterSection,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub transit: TransitConfig,

    #[serde(default)]
    pub exit: ExitConfig,

    /// Static neighbours.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RouterConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RouterError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| RouterError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!(peers = config.peers.len(), "Configuration loaded");
        Ok(config)
    }

    /// Parses configuration from a string.
    ///
    /// # Errors
    /// Parse or validation errors.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RouterError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.paths.validate()?;
        self.transit.validate()?;
        for (i, peer) in self.peers.iter().enumerate() {
            if self.peers[..i].iter().any(|p| p.router_id == peer.router_id) {
                return Err(RouterError::config_invalid(
                    "peers.router_id",
                    format!("duplicate peer {}", peer.router_id.short()),
                ));
            }
        }
        Ok(())
    }

    /// Serializes configuration to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Router ids of the configured peers.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<RouterId> {
        self.peers.iter().map(|p| p.router_id).collect()
    }
}

// ============================================
// RouterSection
// ============================================

/// `[router]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    /// UDP listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Identity key file.
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1090))
}

fn default_key_file() -> String {
    "/etc/nyxpath/identity.json".to_string()
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            key_file: default_key_file(),
        }
    }
}

// ============================================
// PathsConfig
// ============================================

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Hops per circuit.
    #[serde(default = "default_hops")]
    pub hops: usize,

    /// Circuits to keep alive. Zero disables building.
    #[serde(default = "default_paths")]
    pub paths: usize,

    /// Hop lifetime in seconds.
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: u64,

    /// Circuit tick interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_hops() -> usize {
    3
}

fn default_paths() -> usize {
    2
}

fn default_lifetime_secs() -> u64 {
    600
}

fn default_tick_interval_ms() -> u64 {
    500
}

impl PathsConfig {
    fn validate(&self) -> Result<()> {
        if self.hops == 0 || self.hops > MAX_HOPS {
            return Err(RouterError::config_invalid(
                "paths.hops",
                format!("must be 1..={MAX_HOPS}"),
            ));
        }
        if self.lifetime_secs == 0 {
            return Err(RouterError::config_invalid(
                "paths.lifetime_secs",
                "must be greater than 0",
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(RouterError::config_invalid(
                "paths.tick_interval_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Settings for the router's own path set.
    #[must_use]
    pub const fn path_set_config(&self) -> PathSetConfig {
        PathSetConfig {
            hops: self.hops,
            paths: self.paths,
            lifetime: Duration::from_secs(self.lifetime_secs),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            hops: default_hops(),
            paths: default_paths(),
            lifetime_secs: default_lifetime_secs(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

// ============================================
// TransitConfig
// ============================================

/// `[transit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitConfig {
    /// Most hops relayed at once.
    #[serde(default = "default_max_transit_hops")]
    pub max_transit_hops: usize,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Outbound frame queue capacity.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_max_transit_hops() -> usize {
    4096
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_outbound_queue() -> usize {
    4096
}

impl TransitConfig {
    fn validate(&self) -> Result<()> {
        if self.max_transit_hops == 0 {
            return Err(RouterError::config_invalid(
                "transit.max_transit_hops",
                "must be greater than 0",
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(RouterError::config_invalid(
                "transit.sweep_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.outbound_queue == 0 {
            return Err(RouterError::config_invalid(
                "transit.outbound_queue",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            max_transit_hops: default_max_transit_hops(),
            sweep_interval_secs: default_sweep_interval_secs(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

// ============================================
// ExitConfig
// ============================================

/// `[exit]` section.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExitConfig {
    #[serde(default)]
    pub allow_exit: bool,

    #[serde(default)]
    pub permit_internet: bool,
}

impl ExitConfig {
    #[must_use]
    pub const fn policy(&self) -> ExitPolicy {
        ExitPolicy {
            allow_exit: self.allow_exit,
            permit_internet: self.permit_internet,
        }
    }
}

// ============================================
// PeerConfig
// ============================================

/// One `[[peers]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Hex router id (ed25519 public key).
    pub router_id: RouterId,
    /// UDP address.
    pub addr: SocketAddr,
}

// ============================================
// LoggingConfig
// ============================================

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.paths.hops, 3);
        assert!(!config.exit.policy().allow_exit);
    }

    #[test]
    fn test_full_config_format() {
        let id = "11".repeat(32);
        let toml = format!(
            r#"
            [router]
            listen_addr = "127.0.0.1:4000"
            key_file = "/tmp/identity.json"

            [paths]
            hops = 4
            paths = 1
            lifetime_secs = 120

            [transit]
            max_transit_hops = 10

            [exit]
            allow_exit = true

            [[peers]]
            router_id = "{id}"
            addr = "10.0.0.2:1090"

            [logging]
            level = "debug"
        "#
        );

        let config = RouterConfig::from_str(&toml).unwrap();
        assert_eq!(config.router.listen_addr.port(), 4000);
        assert_eq!(config.paths.path_set_config().lifetime, Duration::from_secs(120));
        assert_eq!(config.transit.max_transit_hops, 10);
        assert_eq!(config.transit.outbound_queue, 4096);
        assert!(config.exit.allow_exit);
        assert_eq!(config.peer_ids(), vec![RouterId::from_array([0x11; 32])]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_hops() {
        // Should reject hop counts outside 1..=MAX_HOPS
        assert!(RouterConfig::from_str("[paths]\nhops = 0").is_err());
        let err = RouterConfig::from_str("[paths]\nhops = 9").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_duplicate_peers_rejected() {
        let id = "22".repeat(32);
        let toml = format!(
            "[[peers]]\nrouter_id = \"{id}\"\naddr = \"10.0.0.2:1\"\n\
             [[peers]]\nrouter_id = \"{id}\"\naddr = \"10.0.0.3:1\"\n"
        );
        assert!(RouterConfig::from_str(&toml).is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = RouterConfig::default();
        config.peers.push(PeerConfig {
            router_id: RouterId::from_array([3; 32]),
            addr: "10.0.0.4:1090".parse().unwrap(),
        });
        let restored = RouterConfig::from_str(&config.to_toml()).unwrap();
        assert_eq!(restored.peer_ids(), config.peer_ids());
        assert_eq!(restored.router.key_file, config.router.key_file);
    }
}
