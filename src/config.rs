//! Server configuration
//!
//! A [`ServerConfig`] is assembled from defaults, an optional JSON file and
//! `PGWIRE_*` environment variables, in that order of precedence (later wins).

use crate::auth::AuthMethod;
use crate::protocol::constants::MAX_MESSAGE_LENGTH;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default listen address (the port the extension has always used)
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:15432";

/// Default connection limit
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default `server_version` reported to clients
pub const DEFAULT_SERVER_VERSION: &str = "14";

/// Paths to the PEM certificate chain and private key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsFiles {
    /// Certificate chain (PEM)
    pub cert_path: PathBuf,
    /// Private key (PEM, PKCS#8, PKCS#1 or SEC1)
    pub key_path: PathBuf,
}

/// Wire server configuration
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind (`host:port`)
    pub listen_addr: String,
    /// Maximum concurrent client connections
    pub max_connections: usize,
    /// Largest accepted frontend message payload, in bytes
    pub max_frame_len: usize,
    /// Authentication method
    pub auth: AuthMethod,
    /// User name to password map for password-based methods
    pub users: BTreeMap<String, String>,
    /// TLS material; `None` declines every SSLRequest
    pub tls: Option<TlsFiles>,
    /// `server_version` reported in ParameterStatus
    pub server_version: String,
    /// Log file for the standalone binary (stderr when unset)
    pub log_file: Option<PathBuf>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("max_connections", &self.max_connections)
            .field("max_frame_len", &self.max_frame_len)
            .field("auth", &self.auth)
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .field("tls", &self.tls)
            .field("server_version", &self.server_version)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_len: MAX_MESSAGE_LENGTH,
            auth: AuthMethod::Trust,
            users: BTreeMap::new(),
            tls: None,
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            log_file: None,
        }
    }
}

impl ServerConfig {
    /// Create a builder starting from defaults
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = ServerConfig::builder()
    ///     .listen_addr("0.0.0.0:5432")
    ///     .auth(AuthMethod::ScramSha256)
    ///     .user("sam", "secret")
    ///     .build()?;
    /// ```
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: ServerConfig::default(),
        }
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_json(&text)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Apply `PGWIRE_*` overrides looked up through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(addr) = lookup("PGWIRE_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(max) = lookup("PGWIRE_MAX_CONNECTIONS") {
            self.max_connections = parse_number("PGWIRE_MAX_CONNECTIONS", &max)?;
        }
        if let Some(max) = lookup("PGWIRE_MAX_FRAME_LEN") {
            self.max_frame_len = parse_number("PGWIRE_MAX_FRAME_LEN", &max)?;
        }
        if let Some(auth) = lookup("PGWIRE_AUTH") {
            self.auth = auth.parse()?;
        }
        if let Some(users) = lookup("PGWIRE_USERS") {
            self.users = parse_users(&users)?;
        }
        match (lookup("PGWIRE_TLS_CERT"), lookup("PGWIRE_TLS_KEY")) {
            (Some(cert), Some(key)) => {
                self.tls = Some(TlsFiles {
                    cert_path: cert.into(),
                    key_path: key.into(),
                })
            }
            (None, None) => {}
            _ => {
                return Err(Error::Config(
                    "PGWIRE_TLS_CERT and PGWIRE_TLS_KEY must be set together".into(),
                ))
            }
        }
        if let Some(path) = lookup("PGWIRE_LOG_FILE") {
            self.log_file = Some(path.into());
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.max_frame_len == 0 || self.max_frame_len > MAX_MESSAGE_LENGTH {
            return Err(Error::Config(format!(
                "max_frame_len must be between 1 and {}",
                MAX_MESSAGE_LENGTH
            )));
        }
        if self.auth.requires_password() && self.users.is_empty() {
            return Err(Error::Config(format!(
                "auth method '{}' requires at least one user",
                self.auth
            )));
        }
        Ok(())
    }
}

/// Builder for [`ServerConfig`]
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the connection limit
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the frame size limit
    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.config.max_frame_len = max;
        self
    }

    /// Set the authentication method
    pub fn auth(mut self, method: AuthMethod) -> Self {
        self.config.auth = method;
        self
    }

    /// Add a user
    pub fn user(mut self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.users.insert(name.into(), password.into());
        self
    }

    /// Enable TLS with PEM files
    pub fn tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.config.tls = Some(TlsFiles {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    /// Set the reported server version
    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = version.into();
        self
    }

    /// Set the log file
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_file = Some(path.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a positive integer, got '{}'", key, value)))
}

/// Parse `user:password,user2:password2`
fn parse_users(value: &str) -> Result<BTreeMap<String, String>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (user, password) = entry.split_once(':').ok_or_else(|| {
                Error::Config(format!("PGWIRE_USERS entry '{}' is not user:password", entry))
            })?;
            if user.is_empty() {
                return Err(Error::Config("PGWIRE_USERS entry has an empty user".into()));
            }
            Ok((user.to_string(), password.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:15432");
        assert_eq!(config.auth, AuthMethod::Trust);
        assert!(config.tls.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::builder()
            .listen_addr("0.0.0.0:5433")
            .auth(AuthMethod::ScramSha256)
            .user("sam", "secret")
            .max_connections(4)
            .build()
            .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:5433");
        assert_eq!(config.users.get("sam").map(String::as_str), Some("secret"));
        assert_eq!(config.max_connections, 4);
    }

    #[test]
    fn test_password_auth_requires_users() {
        let result = ServerConfig::builder().auth(AuthMethod::Password).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_json_partial_document() {
        let config = ServerConfig::from_json(
            r#"{"listen_addr": "127.0.0.1:0", "auth": "scram-sha-256", "users": {"sam": "pw"}}"#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:0");
        assert_eq!(config.auth, AuthMethod::ScramSha256);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_json_rejects_unknown_fields() {
        assert!(ServerConfig::from_json(r#"{"listen": "x"}"#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env(env(&[
                ("PGWIRE_LISTEN_ADDR", "0.0.0.0:6543"),
                ("PGWIRE_MAX_CONNECTIONS", "8"),
                ("PGWIRE_AUTH", "password"),
                ("PGWIRE_USERS", "sam:a:b, michael:pw"),
                ("PGWIRE_TLS_CERT", "/tmp/cert.pem"),
                ("PGWIRE_TLS_KEY", "/tmp/key.pem"),
            ]))
            .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:6543");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.auth, AuthMethod::Password);
        // Only the first colon separates user from password
        assert_eq!(config.users.get("sam").map(String::as_str), Some("a:b"));
        assert_eq!(config.users.get("michael").map(String::as_str), Some("pw"));
        assert_eq!(
            config.tls.as_ref().map(|t| t.key_path.clone()),
            Some(PathBuf::from("/tmp/key.pem"))
        );
    }

    #[test]
    fn test_env_tls_requires_both_files() {
        let mut config = ServerConfig::default();
        let result = config.apply_env(env(&[("PGWIRE_TLS_CERT", "/tmp/cert.pem")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_invalid_number() {
        let mut config = ServerConfig::default();
        let result = config.apply_env(env(&[("PGWIRE_MAX_FRAME_LEN", "lots")]));
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("PGWIRE_MAX_FRAME_LEN")));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgwire.json");
        std::fs::write(&path, r#"{"max_frame_len": 65536}"#).unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.max_frame_len, 65536);
    }

    #[test]
    fn test_debug_hides_passwords() {
        let config = ServerConfig::builder().user("sam", "hunter2").build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("sam"));
        assert!(!rendered.contains("hunter2"));
    }
}
