//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/roost/config.toml)
//! 3. Environment variables (ROOST_* prefix, plus SUPABASE_* for the mirror)
//!
//! Environment variables take precedence over config file values.
//! Blob provider credentials are not part of this file; they are discovered
//! from their own variables by [`crate::blob::ProviderDescriptor::detect`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "ROOST";

/// Runtime environment, controls how much detail error responses carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one JSON file per table
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub blob: BlobConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
        }
    }
}

/// Cloud mirror settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the hosted backend (e.g. https://xyz.supabase.co)
    #[serde(default)]
    pub url: Option<String>,

    /// API key sent as `apikey` and bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// Seconds between queue flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Seconds between full-table reconciliations
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Timeout applied to every outbound request
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            flush_interval_secs: default_flush_interval(),
            reconcile_interval_secs: default_reconcile_interval(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl SyncConfig {
    /// Whether enough is configured to attempt mirroring
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.api_key.is_some()
    }
}

/// Attachment storage settings that are not provider credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Directory for the local-disk provider
    #[serde(default)]
    pub local_dir: Option<PathBuf>,

    /// Public base URL under which local-disk files are served
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: None,
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
            blob: BlobConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file (~/.config/roost/config.toml or ROOST_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Configuration rooted at `data_dir` with no mirror and no env lookups
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Some(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Some(val) = env_var("LOG_LEVEL") {
            self.log_level = Some(val);
        }

        if let Some(val) = env_var("HOST") {
            self.server.host = val;
        }

        if let Some(port) = env_var("PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }

        if let Some(env) = env_var("ENV").and_then(|v| v.parse().ok()) {
            self.server.environment = env;
        }

        // The mirror keeps the backend's own variable names
        if let Ok(val) = std::env::var("SUPABASE_URL") {
            self.sync.url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var("SUPABASE_KEY") {
            self.sync.api_key = if val.is_empty() { None } else { Some(val) };
        }

        if let Some(secs) = env_var("SYNC_FLUSH_SECS").and_then(|v| v.parse().ok()) {
            self.sync.flush_interval_secs = secs;
        }

        if let Some(secs) = env_var("SYNC_RECONCILE_SECS").and_then(|v| v.parse().ok()) {
            self.sync.reconcile_interval_secs = secs;
        }

        if let Some(secs) = env_var("HTTP_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.sync.http_timeout_secs = secs;
        }

        if let Some(val) = env_var("BLOB_DIR") {
            self.blob.local_dir = Some(PathBuf::from(val));
        }

        if let Some(val) = env_var("PUBLIC_URL") {
            self.blob.public_url = Some(val);
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with ROOST_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("roost")
            .join("config.toml")
    }

    /// Address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Read a non-empty `ROOST_<name>` variable
fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roost")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_flush_interval() -> u64 {
    30
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_http_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "ROOST_DATA_DIR",
        "ROOST_LOG_LEVEL",
        "ROOST_HOST",
        "ROOST_PORT",
        "ROOST_ENV",
        "ROOST_SYNC_FLUSH_SECS",
        "ROOST_SYNC_RECONCILE_SECS",
        "ROOST_HTTP_TIMEOUT_SECS",
        "ROOST_BLOB_DIR",
        "ROOST_PUBLIC_URL",
        "SUPABASE_URL",
        "SUPABASE_KEY",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.data_dir.ends_with("roost"));
        assert!(!config.sync.is_configured());
        assert_eq!(config.sync.flush_interval_secs, 30);
        assert_eq!(config.sync.reconcile_interval_secs, 300);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.environment, Environment::Development);
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("ROOST_DATA_DIR", "/tmp/roost-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/roost-test"));
    }

    #[test]
    fn test_env_override_mirror() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        assert!(!config.sync.is_configured());

        env::set_var("SUPABASE_URL", "https://loft.supabase.co");
        env::set_var("SUPABASE_KEY", "anon-key");
        env::set_var("ROOST_SYNC_FLUSH_SECS", "5");
        config.apply_env_overrides();

        assert!(config.sync.is_configured());
        assert_eq!(config.sync.flush_interval_secs, 5);

        // Empty string clears it
        env::set_var("SUPABASE_URL", "");
        config.apply_env_overrides();
        assert!(config.sync.url.is_none());
        assert!(!config.sync.is_configured());
    }

    #[test]
    fn test_env_override_server() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("ROOST_PORT", "8080");
        env::set_var("ROOST_ENV", "production");
        config.apply_env_overrides();

        assert_eq!(config.server.port, 8080);
        assert!(config.server.environment.is_production());
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");

        // Unparseable values leave the previous setting in place
        env::set_var("ROOST_PORT", "not-a-port");
        config.apply_env_overrides();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!(
            "Development".parse::<Environment>(),
            Ok(Environment::Development)
        );
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Production.to_string(), "production");
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::with_data_dir("/data/roost");
        config.sync.url = Some("https://loft.supabase.co".to_string());

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("[sync]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.sync.url, config.sync.url);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"

            [server]
            port = 4100
            environment = "production"

            [sync]
            url = "https://example.supabase.co"
            api_key = "k"
            reconcile_interval_secs = 600
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.environment.is_production());
        assert!(config.sync.is_configured());
        assert_eq!(config.sync.reconcile_interval_secs, 600);
        assert_eq!(config.sync.flush_interval_secs, 30);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        env::set_var("ROOST_DATA_DIR", &data_dir);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();

        // Defaults are used and the data directory is created
        assert_eq!(config.data_dir, data_dir);
        assert!(data_dir.exists());
        assert!(!config.sync.is_configured());
    }
}
