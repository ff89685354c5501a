use crate::secret::{SecretDecryptor, SecretError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One NPS server as stored in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerEntry {
    /// Host name or IP address
    pub host: String,
    /// Authentication port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret as stored (ciphertext, decrypted before use)
    pub secret: String,
}

/// Which configured server an attempt went to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    Primary,
    Secondary,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Primary => write!(f, "primary"),
            ServerRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Login client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server tried first on every login
    pub primary: ServerEntry,

    /// Server tried when the primary gives no authoritative answer
    #[serde(default)]
    pub secondary: Option<ServerEntry>,

    /// NAS-Identifier sent in every Access-Request
    #[serde(default = "default_nas_identifier")]
    pub nas_identifier: String,

    /// Per-send reply timeout in milliseconds (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total number of sends per server before giving up (default: 3)
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Add a Message-Authenticator to every Access-Request (default: true)
    #[serde(default = "default_true")]
    pub message_authenticator: bool,

    /// Check MS-CHAP2-Success against the expected authenticator response
    /// when the server sends one (default: true)
    #[serde(default = "default_true")]
    pub verify_mschap2_success: bool,

    /// Treat an Access-Accept without MS-CHAP2-Success as a decode error
    /// (default: false)
    #[serde(default)]
    pub require_mschap2_success: bool,

    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default)]
    pub log_level: Option<String>,

    /// Audit log file path (JSON lines, optional)
    #[serde(default)]
    pub audit_log_path: Option<String>,
}

fn default_port() -> u16 {
    1812 // Standard RADIUS authentication port
}

fn default_nas_identifier() -> String {
    "admin-portal".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Minimal configuration with a single server and all defaults
    pub fn new(primary: ServerEntry) -> Self {
        Config {
            primary,
            secondary: None,
            nas_identifier: default_nas_identifier(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            message_authenticator: true,
            verify_mschap2_success: true,
            require_mschap2_success: false,
            log_level: None,
            audit_log_path: None,
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured entry for a role, if any
    pub fn server(&self, role: ServerRole) -> Option<&ServerEntry> {
        match role {
            ServerRole::Primary => Some(&self.primary),
            ServerRole::Secondary => self.secondary.as_ref(),
        }
    }

    /// Build the per-attempt settings for one server, decrypting its secret
    ///
    /// Each server's secret is decrypted independently, so a broken
    /// secondary secret never affects a primary attempt.
    pub fn settings_for(
        &self,
        role: ServerRole,
        decryptor: &dyn SecretDecryptor,
    ) -> Result<Option<ServerSettings>, SecretError> {
        let Some(entry) = self.server(role) else {
            return Ok(None);
        };
        let secret = decryptor.decrypt(&entry.secret)?;
        if secret.is_empty() {
            return Err(SecretError::Empty);
        }

        Ok(Some(ServerSettings {
            host: entry.host.clone(),
            port: entry.port,
            secret,
            nas_identifier: self.nas_identifier.clone(),
            timeout: self.timeout(),
            retries: self.retries.max(1),
            message_authenticator: self.message_authenticator,
            verify_mschap2_success: self.verify_mschap2_success,
            require_mschap2_success: self.require_mschap2_success,
        }))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut servers = vec![("primary", &self.primary)];
        if let Some(ref secondary) = self.secondary {
            servers.push(("secondary", secondary));
        }

        for (role, server) in servers {
            if server.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} server has empty host", role)));
            }
            if server.port == 0 {
                return Err(ConfigError::Invalid(format!("{} server port cannot be 0", role)));
            }
            if server.secret.is_empty() {
                return Err(ConfigError::Invalid(format!("{} server has empty secret", role)));
            }
        }

        if self.nas_identifier.is_empty() {
            return Err(ConfigError::Invalid("NAS identifier cannot be empty".to_string()));
        }
        if self.nas_identifier.len() > radius_proto::Attribute::MAX_VALUE_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "NAS identifier too long: {} bytes",
                self.nas_identifier.len()
            )));
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("Timeout cannot be 0".to_string()));
        }

        if self.retries == 0 {
            return Err(ConfigError::Invalid("Retries must be at least 1".to_string()));
        }

        if self.require_mschap2_success && !self.verify_mschap2_success {
            return Err(ConfigError::Invalid(
                "require_mschap2_success needs verify_mschap2_success".to_string(),
            ));
        }

        Ok(())
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        Config {
            primary: ServerEntry {
                host: "10.0.0.10".to_string(),
                port: 1812,
                secret: "primary_secret".to_string(),
            },
            secondary: Some(ServerEntry {
                host: "10.0.0.11".to_string(),
                port: 1812,
                secret: "secondary_secret".to_string(),
            }),
            nas_identifier: "admin-portal".to_string(),
            timeout_ms: 5000,
            retries: 3,
            message_authenticator: true,
            verify_mschap2_success: true,
            require_mschap2_success: false,
            log_level: Some("info".to_string()),
            audit_log_path: Some("/var/log/nps-auth/audit.log".to_string()),
        }
    }
}

/// Everything one attempt against one server needs, secret in plaintext
///
/// Built fresh for every call and dropped with it.
#[derive(Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub secret: Vec<u8>,
    pub nas_identifier: String,
    pub timeout: Duration,
    /// Total number of sends, at least 1
    pub retries: u32,
    pub message_authenticator: bool,
    pub verify_mschap2_success: bool,
    pub require_mschap2_success: bool,
}

impl ServerSettings {
    pub fn new(host: impl Into<String>, port: u16, secret: impl Into<Vec<u8>>) -> Self {
        ServerSettings {
            host: host.into(),
            port,
            secret: secret.into(),
            nas_identifier: default_nas_identifier(),
            timeout: Duration::from_millis(default_timeout_ms()),
            retries: default_retries(),
            message_authenticator: true,
            verify_mschap2_success: true,
            require_mschap2_success: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn with_nas_identifier(mut self, nas_identifier: impl Into<String>) -> Self {
        self.nas_identifier = nas_identifier.into();
        self
    }

    /// `host:port` for logs
    pub fn target(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret", &"<redacted>")
            .field("nas_identifier", &self.nas_identifier)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish()
    }
}
