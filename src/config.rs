//! SDK configuration
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! is a valid configuration.

use crate::error::ConfigError;
use crate::transport::TransportKind;
use aerolink_shared::limits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Overrides the data directory when set
pub const HOME_ENV: &str = "AEROLINK_HOME";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub cable: CableConfig,
    #[serde(default)]
    pub wireless: WirelessConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl SdkConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SdkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registration.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "registration.max_attempts must be at least 1".into(),
            ));
        }
        if self.storage.debug_log_capacity_bytes == 0 {
            return Err(ConfigError::Invalid(
                "storage.debug_log_capacity_bytes must be positive".into(),
            ));
        }
        if self.link.reconnect_delay_ms > self.link.max_reconnect_delay_ms {
            return Err(ConfigError::Invalid(
                "link.reconnect_delay_ms exceeds link.max_reconnect_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Endpoint of the authorization service
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    /// Upper bound on how long a verified registration stays cached
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Network verification attempts before reporting a network failure
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            authority_url: default_authority_url(),
            cache_ttl_secs: default_cache_ttl(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl RegistrationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_authority_url() -> String {
    "http://127.0.0.1:4040/v1/verify".to_string()
}

fn default_cache_ttl() -> u64 {
    30 * 24 * 60 * 60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Transport selected when the manager is created
    #[serde(default = "default_transport")]
    pub default_transport: TransportKind,
    /// Close the session when the application is backgrounded
    #[serde(default = "default_true")]
    pub close_on_background: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_transport: default_transport(),
            close_on_background: true,
        }
    }
}

fn default_transport() -> TransportKind {
    TransportKind::Cable
}

fn default_true() -> bool {
    true
}

/// Retry and timeout knobs shared by every stream link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
    /// Consecutive failures tolerated before an announced device is reported lost
    #[serde(default = "default_max_link_retries")]
    pub max_link_retries: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            max_link_retries: default_max_link_retries(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl LinkConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn default_reconnect_delay() -> u64 {
    500
}

fn default_max_reconnect_delay() -> u64 {
    8000
}

fn default_max_link_retries() -> u32 {
    3
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_read_timeout() -> u64 {
    limits::LINK_SILENCE_TIMEOUT_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CableConfig {
    /// Explicit serial device path; when unset the first matching USB port is used
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    /// Accepted USB vendor ids (empty accepts any USB serial adapter)
    #[serde(default)]
    pub usb_vendor_ids: Vec<u16>,
}

impl Default for CableConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud(),
            usb_vendor_ids: Vec::new(),
        }
    }
}

fn default_baud() -> u32 {
    921_600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirelessConfig {
    /// Address the product listens on inside its own network
    #[serde(default = "default_wireless_address")]
    pub address: String,
}

impl Default for WirelessConfig {
    fn default() -> Self {
        Self {
            address: default_wireless_address(),
        }
    }
}

fn default_wireless_address() -> String {
    format!("192.168.2.1:{}", limits::DEFAULT_WIRELESS_PORT)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_bridge_port(),
        }
    }
}

fn default_bridge_port() -> u16 {
    limits::DEFAULT_BRIDGE_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    #[serde(default = "default_scan_duration")]
    pub scan_duration_ms: u64,
    /// Bound on each pairing step (pair, confirm)
    #[serde(default = "default_pairing_timeout")]
    pub pairing_timeout_ms: u64,
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Only peers whose advertised name starts with this are listed
    #[serde(default = "default_name_prefix")]
    pub name_prefix: Option<String>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            scan_duration_ms: default_scan_duration(),
            pairing_timeout_ms: default_pairing_timeout(),
            channel: default_channel(),
            name_prefix: default_name_prefix(),
        }
    }
}

impl RadioConfig {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }
}

fn default_scan_duration() -> u64 {
    8000
}

fn default_pairing_timeout() -> u64 {
    30_000
}

fn default_channel() -> u8 {
    1
}

fn default_name_prefix() -> Option<String> {
    Some("Aerolink-".into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of everything the SDK writes (cache, flight logs, debug logs)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_debug_capacity")]
    pub debug_log_capacity_bytes: u64,
    /// How often a new debug log file is started
    #[serde(default)]
    pub debug_log_rotation: LogRotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    #[default]
    Hourly,
    Daily,
    Never,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            debug_log_capacity_bytes: default_debug_capacity(),
            debug_log_rotation: LogRotation::default(),
        }
    }
}

impl StorageConfig {
    /// Resolve the data directory: env override, then config, then the
    /// platform data dir, then `./.aerolink`
    pub fn data_dir(&self) -> PathBuf {
        if let Some(home) = std::env::var_os(HOME_ENV) {
            return PathBuf::from(home);
        }
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("aerolink"))
            .unwrap_or_else(|| PathBuf::from(".aerolink"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    /// Flight logs written by products; the SDK only reports the location
    pub fn flight_log_dir(&self) -> PathBuf {
        self.data_dir().join("flight-logs")
    }

    pub fn debug_log_dir(&self) -> PathBuf {
        self.data_dir().join("debug-logs")
    }
}

fn default_debug_capacity() -> u64 {
    limits::DEBUG_LOG_CAPACITY_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SdkConfig::from_toml_str("").unwrap();
        assert_eq!(config.registration.max_attempts, 3);
        assert_eq!(config.session.default_transport, TransportKind::Cable);
        assert!(config.session.close_on_background);
        assert_eq!(config.bridge.port, limits::DEFAULT_BRIDGE_PORT);
        assert_eq!(
            config.storage.debug_log_capacity_bytes,
            limits::DEBUG_LOG_CAPACITY_BYTES
        );
    }

    #[test]
    fn test_partial_sections() {
        let config = SdkConfig::from_toml_str(
            r#"
            [registration]
            max_attempts = 5
            cache_ttl_secs = 60

            [session]
            default_transport = "bridge"
            close_on_background = false

            [storage]
            data_dir = "/tmp/aerolink-test"
            "#,
        )
        .unwrap();
        assert_eq!(config.registration.max_attempts, 5);
        assert_eq!(config.registration.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.registration.retry_delay_ms, 1000);
        assert_eq!(config.session.default_transport, TransportKind::Bridge);
        assert!(!config.session.close_on_background);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/aerolink-test")));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = SdkConfig::from_toml_str("[registration]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_debug_capacity_rejected() {
        let err = SdkConfig::from_toml_str("[storage]\ndebug_log_capacity_bytes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_debug_log_rotation() {
        let config = SdkConfig::from_toml_str("").unwrap();
        assert_eq!(config.storage.debug_log_rotation, LogRotation::Hourly);

        let config =
            SdkConfig::from_toml_str("[storage]\ndebug_log_rotation = \"daily\"\n").unwrap();
        assert_eq!(config.storage.debug_log_rotation, LogRotation::Daily);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = SdkConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.link.max_link_retries, 3);
    }
}
