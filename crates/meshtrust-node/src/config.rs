//! Node configuration loading and management.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use meshtrust_core::AuthConfig;

/// Full configuration for a meshtrust node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MeshtrustConfig {
    /// Listener and dial settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Handshake policy.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Local admin API.
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen address for peer connections.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Peers to dial on startup (`host:port`).
    #[serde(default)]
    pub peers: Vec<String>,
    /// Seconds between redial attempts for configured peers.
    #[serde(default = "default_redial_secs")]
    pub redial_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// Path to the keypair file. Defaults to `<data_dir>/identity.key`.
    #[serde(default)]
    pub keypair_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the admin API. Operator commands go through it while the node runs.
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    /// Listen address. Keep this on loopback: the API is unauthenticated.
    #[serde(default = "default_api_listen_addr")]
    pub listen_addr: String,
    /// Listen port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    7600
}
fn default_redial_secs() -> u64 {
    30
}
fn default_api_enabled() -> bool {
    true
}
fn default_api_listen_addr() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    7601
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            peers: Vec::new(),
            redial_secs: default_redial_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen_addr: default_api_listen_addr(),
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl MeshtrustConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: MeshtrustConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.network.listen_addr, self.network.port).parse()?)
    }

    pub fn api_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.api.listen_addr, self.api.port).parse()?)
    }

    /// Base URL operator commands use to reach a running node.
    pub fn api_endpoint(&self) -> String {
        format!("http://{}:{}", self.api.listen_addr, self.api.port)
    }

    pub fn keypair_path(&self) -> PathBuf {
        self.identity
            .keypair_path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("identity.key"))
    }

    pub fn trust_db_path(&self) -> PathBuf {
        self.storage.data_dir.join("trust")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeshtrustConfig::default();
        assert_eq!(config.network.port, 7600);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.auth.max_challenge_age_secs, 30);
        assert!(config.network.peers.is_empty());
    }

    #[test]
    fn test_derived_paths() {
        let config = MeshtrustConfig::default();
        assert_eq!(config.keypair_path(), PathBuf::from("./data/identity.key"));
        assert_eq!(config.trust_db_path(), PathBuf::from("./data/trust"));

        let mut config = config;
        config.identity.keypair_path = Some(PathBuf::from("/etc/meshtrust/key"));
        assert_eq!(config.keypair_path(), PathBuf::from("/etc/meshtrust/key"));
    }

    #[test]
    fn test_listen_socket_addr() {
        let config = MeshtrustConfig::default();
        assert_eq!(config.listen_socket_addr().unwrap(), "0.0.0.0:7600".parse().unwrap());
    }

    #[test]
    fn test_api_defaults_to_loopback() {
        let config = MeshtrustConfig::default();
        assert!(config.api.enabled);
        assert!(config.api_socket_addr().unwrap().ip().is_loopback());
        assert_eq!(config.api_endpoint(), "http://127.0.0.1:7601");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = MeshtrustConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let decoded: MeshtrustConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(decoded.network.port, config.network.port);
        assert_eq!(decoded.auth, config.auth);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let config = MeshtrustConfig::load(Path::new("/nonexistent/meshtrust.toml")).unwrap();
        assert_eq!(config.network.port, 7600);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = std::env::temp_dir().join(format!("meshtrust-config-{}", uuid::Uuid::now_v7()));
        let path = dir.join("meshtrust.toml");
        let mut config = MeshtrustConfig::default();
        config.network.peers = vec!["10.0.0.5:7600".into()];
        config.save(&path).unwrap();

        let loaded = MeshtrustConfig::load(&path).unwrap();
        assert_eq!(loaded.network.peers, config.network.peers);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_from_toml_partial() {
        let toml_str = r#"
[network]
port = 8000

[auth]
max_challenge_age_secs = 10
"#;
        let config: MeshtrustConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.network.port, 8000);
        assert_eq!(config.auth.max_challenge_age_secs, 10);
        // Defaults for unspecified
        assert_eq!(config.auth.cooldown_secs, 300);
        assert_eq!(config.logging.format, "text");
    }
}
