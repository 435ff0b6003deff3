//! Configuration surface (spec.md §4.5, §6). Follows the teacher's
//! `config::AppConfig` pattern: typed sub-structs, `#[serde(default =
//! "...")]` fallbacks on every field, loaded from `config.yaml` via
//! `serde_yaml` with a hard-coded fallback (and a warning) when the file
//! is absent.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Binary,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// The hosting application supplies the upstream target; the bridge
    /// connects as soon as a browser socket opens.
    Server,
    /// The browser supplies `{auth: {host, port, password}}` before any
    /// command is honored.
    Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    #[serde(default = "default_bridge_config")]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// The option table from spec.md §4.5.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default = "default_rcon_host")]
    pub host: String,
    /// Upstream port when `auth_mode = Server`. Defaults differ by
    /// protocol (binary 27015, json 28016) and are resolved in
    /// [`BridgeConfig::resolved_port`] rather than baked into a single
    /// default, since the default depends on `protocol`.
    pub port: Option<u16>,
    #[serde(default = "default_rcon_password")]
    pub password: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_target_id")]
    pub target_id: String,
    #[serde(default = "default_swap_style")]
    pub swap_style: String,
}

impl BridgeConfig {
    pub fn resolved_port(&self) -> u16 {
        self.port.unwrap_or(match self.protocol {
            Protocol::Binary => 27015,
            Protocol::Json => 28016,
        })
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

fn default_server_config() -> ServerConfig {
    ServerConfig { host: default_host(), port: default_port() }
}

fn default_bridge_config() -> BridgeConfig {
    BridgeConfig {
        protocol: default_protocol(),
        host: default_rcon_host(),
        port: None,
        password: default_rcon_password(),
        path: default_path(),
        auth_mode: default_auth_mode(),
        timeout_ms: default_timeout_ms(),
        target_id: default_target_id(),
        swap_style: default_swap_style(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_protocol() -> Protocol {
    Protocol::Json
}
fn default_rcon_host() -> String {
    "127.0.0.1".to_string()
}
fn default_rcon_password() -> String {
    "changeme".to_string()
}
fn default_path() -> String {
    "/ws/rcon".to_string()
}
fn default_auth_mode() -> AuthMode {
    AuthMode::Server
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_target_id() -> String {
    "console".to_string()
}
fn default_swap_style() -> String {
    "beforeend".to_string()
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Path::new("config.yaml");
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)?;
            let config: AppConfig = serde_yaml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::warn!("config.yaml not found, using defaults");
            Ok(AppConfig {
                server: default_server_config(),
                bridge: default_bridge_config(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_port_defaults_by_protocol() {
        let mut bridge = default_bridge_config();
        bridge.protocol = Protocol::Binary;
        assert_eq!(bridge.resolved_port(), 27015);
        bridge.protocol = Protocol::Json;
        assert_eq!(bridge.resolved_port(), 28016);
    }

    #[test]
    fn explicit_port_overrides_default() {
        let mut bridge = default_bridge_config();
        bridge.port = Some(12345);
        assert_eq!(bridge.resolved_port(), 12345);
    }
}
