//! Configuration for the relay server and client.
//!
//! Values are layered, lowest to highest priority:
//! 1. Built-in defaults
//! 2. TOML config file (`[server]` and `[client]` tables)
//! 3. Environment (`RELAY_HOST`, `RELAY_PORT`)
//! 4. Command-line flags (applied by the binaries)
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 12345
//!
//! [client]
//! host = "chat.example.net"
//! name = "alice"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Default listen/connect port.
pub const DEFAULT_PORT: u16 = 12345;

/// Default server bind address (all interfaces).
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default client connect address.
pub const DEFAULT_CLIENT_HOST: &str = "127.0.0.1";

/// Default maximum frame length (64 KiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Default number of messages buffered per peer.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default time a full outbound queue may stay full before its peer is evicted.
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 5_000;

/// File name looked up in the user config directory.
pub const CONFIG_FILE_NAME: &str = "relay.toml";

/// Environment variable overriding the host of the active role.
pub const ENV_HOST: &str = "RELAY_HOST";

/// Environment variable overriding the port of the active role.
pub const ENV_PORT: &str = "RELAY_PORT";

/// Server-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Listen port (0 picks an ephemeral port)
    pub port: u16,

    /// Longest accepted frame in bytes, delimiter excluded
    pub max_frame_len: usize,

    /// Per-peer outbound queue depth
    pub outbound_capacity: usize,

    /// How long a broadcast waits on a full queue before evicting the peer
    pub stall_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_PORT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Checks values that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_nonzero("server.max_frame_len", self.max_frame_len)?;
        validate_nonzero("server.outbound_capacity", self.outbound_capacity)?;
        validate_nonzero("server.stall_timeout_ms", self.stall_timeout_ms)
    }
}

/// Client-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Server address to connect to
    pub host: String,

    /// Server port
    pub port: u16,

    /// Display name prefixed to outgoing lines; prompted for when absent
    pub name: Option<String>,

    /// Longest accepted inbound frame in bytes
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CLIENT_HOST.to_string(),
            port: DEFAULT_PORT,
            name: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    /// `host:port` string suitable for connecting.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_nonzero("client.max_frame_len", self.max_frame_len)?;
        if let Some(name) = &self.name {
            validate_name(name.trim())?;
        }
        Ok(())
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl RelayConfig {
    /// Parses a TOML document.
    pub fn from_toml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Reads and parses the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents, path)?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/relay/relay.toml` (or the platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("relay").join(CONFIG_FILE_NAME))
    }

    /// Loads an explicit config file, or the default one when it exists.
    ///
    /// A missing explicit file is an error; a missing default file is not.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) => Self::load_or_default(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Loads `path` if it exists, otherwise returns defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies `RELAY_HOST` / `RELAY_PORT` to the server section.
    ///
    /// `lookup` abstracts `std::env::var` so callers and tests can supply
    /// their own environment.
    pub fn apply_server_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = parse_port(&port)?;
        }
        Ok(())
    }

    /// Applies `RELAY_HOST` / `RELAY_PORT` to the client section.
    pub fn apply_client_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.client.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.client.port = parse_port(&port)?;
        }
        Ok(())
    }
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidFieldValue {
            field: ENV_PORT.to_string(),
            value: value.to_string(),
            expected: "a port number between 0 and 65535".to_string(),
        })
}

/// Rejects display names that would break line framing.
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.contains(['\n', '\r']) {
        return Err(ConfigError::InvalidFieldValue {
            field: "client.name".to_string(),
            value: name.escape_debug().to_string(),
            expected: "a single line of text".to_string(),
        });
    }
    Ok(())
}

fn validate_nonzero<T>(field: &str, value: T) -> Result<(), ConfigError>
where
    T: Copy + Default + PartialEq + ToString,
{
    if value == T::default() {
        return Err(ConfigError::InvalidFieldValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "a value greater than 0".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:12345");
        assert_eq!(config.client.server_addr(), "127.0.0.1:12345");
        assert_eq!(config.client.name, None);
        assert!(config.server.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RelayConfig::from_toml(
            "[server]\nport = 4000\n\n[client]\nname = \"alice\"\n",
            Path::new("inline"),
        )
        .unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, DEFAULT_SERVER_HOST);
        assert_eq!(config.client.name.as_deref(), Some("alice"));
        assert_eq!(config.client.port, DEFAULT_PORT);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = RelayConfig::from_toml("[server]\nbogus = 1\n", Path::new("relay.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("relay.toml"));
    }

    #[test]
    fn test_env_overrides_server() {
        let mut config = RelayConfig::default();
        config
            .apply_server_env(env(&[("RELAY_HOST", "127.0.0.1"), ("RELAY_PORT", "9000")]))
            .unwrap();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:9000");
        // client section untouched
        assert_eq!(config.client.port, DEFAULT_PORT);
    }

    #[test]
    fn test_env_overrides_client() {
        let mut config = RelayConfig::default();
        config
            .apply_client_env(env(&[("RELAY_PORT", " 7000 ")]))
            .unwrap();
        assert_eq!(config.client.port, 7000);
        assert_eq!(config.client.host, DEFAULT_CLIENT_HOST);
    }

    #[test]
    fn test_env_bad_port() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_server_env(env(&[("RELAY_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("not-a-port"));
    }

    #[test]
    fn test_zero_capacity_invalid() {
        let server = ServerConfig {
            outbound_capacity: 0,
            ..Default::default()
        };
        assert!(server.validate().is_err());

        let client = ClientConfig {
            max_frame_len: 0,
            ..Default::default()
        };
        assert!(client.validate().is_err());

        let server = ServerConfig {
            stall_timeout_ms: 0,
            ..Default::default()
        };
        assert!(server.validate().is_err());
    }

    #[test]
    fn test_stall_timeout_from_toml() {
        let config =
            RelayConfig::from_toml("[server]\nstall_timeout_ms = 250\n", Path::new("inline"))
                .unwrap();
        assert_eq!(config.server.stall_timeout(), Duration::from_millis(250));
        assert_eq!(
            RelayConfig::default().server.stall_timeout(),
            Duration::from_millis(DEFAULT_STALL_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_multiline_name_rejected() {
        let client = ClientConfig {
            name: Some("ali\nce".to_string()),
            ..Default::default()
        };
        let err = client.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFieldValue { .. }));
        assert!(err.to_string().contains("client.name"));

        assert!(validate_name("bob\r").is_err());
        assert!(validate_name("  carol ").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nhost = \"127.0.0.1\"\noutbound_capacity = 8").unwrap();

        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.outbound_capacity, 8);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("absent.toml");
        assert_eq!(
            RelayConfig::load_or_default(&path).unwrap(),
            RelayConfig::default()
        );
    }

    #[test]
    fn test_discover_explicit_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(RelayConfig::discover(Some(&path)).is_err());
    }

    #[test]
    fn test_default_path_file_name() {
        if let Some(path) = RelayConfig::default_path() {
            assert!(path.ends_with("relay/relay.toml"));
        }
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RelayConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
