//! Configuration management
//!
//! The transport configuration is read once, validated, and then shared as an
//! immutable `Arc<TransportConfig>` by every exchange, the scheduler and the
//! transport. Nothing hands out `&mut` after that point, so the value cannot
//! change while requests are in flight.
//!
//! The file is stored in TOML format at ~/.config/bfs/config.toml, or under
//! `$BFS_CONFIG_DIR` when set.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "BFS_CONFIG_DIR";

/// Minimum part size: 5 MiB (S3 requirement)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size: 5 GiB
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per unit of work
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    10000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): doubling, capped.
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        std::time::Duration::from_millis(delay)
    }
}

/// Timeout configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,

    /// An exchange whose bytes have not moved for this long is failed (0 disables)
    #[serde(default = "default_read_timeout")]
    pub read_ms: u64,
}

fn default_connect_timeout() -> u64 {
    10000
}

fn default_read_timeout() -> u64 {
    30000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            read_ms: default_read_timeout(),
        }
    }
}

/// Everything an exchange needs to know about the provider, read-only once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Service endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bucket projected as the filesystem root
    pub bucket: String,

    /// Access key ID
    #[serde(default)]
    pub access_key: String,

    /// Secret access key
    #[serde(default)]
    pub secret_key: String,

    /// Send unsigned requests
    #[serde(default)]
    pub public_bucket: bool,

    /// Canned ACL attached to new objects
    #[serde(default = "default_acl")]
    pub default_acl: String,

    /// Store new objects with reduced redundancy
    #[serde(default)]
    pub use_rrs: bool,

    /// Request server-side encryption for new objects
    #[serde(default)]
    pub use_sse: bool,

    /// Send Content-MD5 with uploads
    #[serde(default)]
    pub content_md5: bool,

    /// Share connections and resolver state between exchanges
    #[serde(default = "default_true")]
    pub dns_cache: bool,

    /// Verify the TLS certificate host name
    #[serde(default = "default_true")]
    pub ssl_verify_hostname: bool,

    /// Extra CA bundle (PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<PathBuf>,

    /// `mime.types` file; the system file is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_file: Option<PathBuf>,

    /// Maximum concurrently open part transfers
    #[serde(default = "default_parallel")]
    pub max_parallel_upload: usize,

    /// Part size for multipart uploads
    #[serde(default = "default_multipart_size")]
    pub multipart_size: u64,

    /// Part size for server-side multipart copies
    #[serde(default = "default_copy_part_size")]
    pub copy_part_size: u64,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

fn default_endpoint() -> String {
    "https://s3.amazonaws.com".to_string()
}

fn default_acl() -> String {
    "private".to_string()
}

fn default_true() -> bool {
    true
}

fn default_parallel() -> usize {
    5
}

fn default_multipart_size() -> u64 {
    10 * 1024 * 1024
}

fn default_copy_part_size() -> u64 {
    512 * 1024 * 1024
}

impl TransportConfig {
    /// Create a configuration with required fields and defaults elsewhere
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            public_bucket: false,
            default_acl: default_acl(),
            use_rrs: false,
            use_sse: false,
            content_md5: false,
            dns_cache: true,
            ssl_verify_hostname: true,
            ca_bundle: None,
            mime_file: None,
            max_parallel_upload: default_parallel(),
            multipart_size: default_multipart_size(),
            copy_part_size: default_copy_part_size(),
            retry: RetryConfig::default(),
            timeout: TimeoutConfig::default(),
        }
    }

    /// Whether both halves of the credentials are present
    pub fn has_credentials(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }

    /// Reject values no exchange could work with
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Endpoint scheme must be http or https: {}",
                self.endpoint
            )));
        }
        if self.bucket.is_empty() {
            return Err(Error::Config("Bucket name cannot be empty".into()));
        }
        if !self.public_bucket && !self.has_credentials() {
            return Err(Error::Signature(
                "Access key and secret key are required unless public_bucket is set".into(),
            ));
        }
        if self.max_parallel_upload == 0 {
            return Err(Error::Config("max_parallel_upload must be at least 1".into()));
        }
        for (name, size) in [
            ("multipart_size", self.multipart_size),
            ("copy_part_size", self.copy_part_size),
        ] {
            if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&size) {
                return Err(Error::Config(format!(
                    "{name} must be between {MIN_PART_SIZE} and {MAX_PART_SIZE} bytes, got {size}"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Main configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    pub schema_version: u32,

    /// Transport settings
    pub transport: TransportConfig,
}

impl Config {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            transport,
        }
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join("bfs"),
        };
        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load and validate the configuration.
    ///
    /// Unlike most settings files a missing file is an error: there is no
    /// usable default bucket or credential.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Err(Error::Config(format!(
                "Configuration file not found: {}",
                self.config_path.display()
            )));
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade bfs.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        config.transport.validate()?;
        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 600 (owner read/write only).
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)?;
        }

        Ok(())
    }

    /// Migrate configuration from older schema version
    fn migrate(&self, config: Config) -> Result<Config> {
        let mut config = config;
        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = ConfigManager::with_path(config_path);
        (manager, temp_dir)
    }

    fn sample() -> TransportConfig {
        TransportConfig::new("http://localhost:9000", "bucket", "AKID", "secret")
    }

    #[test]
    fn test_defaults() {
        let config = sample();
        assert_eq!(config.default_acl, "private");
        assert_eq!(config.max_parallel_upload, 5);
        assert_eq!(config.multipart_size, 10 * 1024 * 1024);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = sample();
        config.multipart_size = 1024;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = sample();
        config.max_parallel_upload = 0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.endpoint = "ftp://example.com".into();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.secret_key.clear();
        assert!(matches!(config.validate(), Err(Error::Signature(_))));

        config.public_bucket = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_curve() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        };
        assert_eq!(retry.backoff(1).as_millis(), 100);
        assert_eq!(retry.backoff(2).as_millis(), 200);
        assert_eq!(retry.backoff(3).as_millis(), 400);
        assert_eq!(retry.backoff(5).as_millis(), 1000);
        assert_eq!(retry.backoff(60).as_millis(), 1000);
    }

    #[test]
    fn test_load_missing_file() {
        let (manager, _temp_dir) = temp_config_manager();
        assert!(matches!(manager.load(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let (manager, _temp_dir) = temp_config_manager();

        let mut transport = sample();
        transport.use_sse = true;
        transport.retry.max_attempts = 7;
        manager.save(&Config::new(transport.clone())).unwrap();

        let loaded = manager.load().unwrap();
        assert_eq!(loaded.transport, transport);
    }

    #[test]
    fn test_minimal_file_gets_defaults() {
        let (manager, _temp_dir) = temp_config_manager();
        std::fs::write(
            manager.config_path(),
            r#"
            schema_version = 1

            [transport]
            bucket = "media"
            access_key = "AKID"
            secret_key = "secret"
            "#,
        )
        .unwrap();

        let loaded = manager.load().unwrap();
        assert_eq!(loaded.transport.endpoint, "https://s3.amazonaws.com");
        assert_eq!(loaded.transport.timeout.read_ms, 30000);
        assert!(loaded.transport.dns_cache);
    }

    #[test]
    fn test_schema_version_too_new() {
        let (manager, _temp_dir) = temp_config_manager();

        let content = format!(
            r#"
            schema_version = {}

            [transport]
            bucket = "media"
            "#,
            SCHEMA_VERSION + 1
        );
        std::fs::write(manager.config_path(), content).unwrap();

        let result = manager.load();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("newer than supported"));
    }
}
