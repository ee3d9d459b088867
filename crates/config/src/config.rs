//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value parsed but is outside its allowed range
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Where images are sent for background removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Self-hosted backend, no credential.
    #[default]
    Local,
    /// Hosted API, requires an API key and is rate limited.
    #[serde(alias = "api")]
    Remote,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::Local => write!(f, "local"),
            ProcessingMode::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for ProcessingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ProcessingMode::Local),
            "remote" | "api" => Ok(ProcessingMode::Remote),
            other => Err(ConfigError::Invalid(format!(
                "unknown processing mode '{}'",
                other
            ))),
        }
    }
}

/// Image format requested from the processing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Webp,
    #[serde(alias = "jpeg")]
    Jpg,
}

impl OutputFormat {
    /// Value sent in the `format` form field.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Jpg => "jpg",
        }
    }

    /// File extension used when exporting results.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// MIME type of the processed output.
    pub fn media_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Jpg => "image/jpeg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            other => Err(ConfigError::Invalid(format!(
                "unknown output format '{}'",
                other
            ))),
        }
    }
}

/// Queue and request parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingConfig {
    /// Initial processing mode (default local)
    #[serde(default)]
    pub mode: ProcessingMode,
    /// Output format requested from the service (default png)
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Output quality 1-100 (default 95)
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Pause after every remote request in milliseconds (default and minimum 3000)
    #[serde(default = "default_remote_delay_ms")]
    pub remote_delay_ms: u64,
    /// Maximum images accepted in one batch (default 10)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_quality() -> u8 {
    95
}

/// Shortest pause allowed between remote requests in milliseconds
pub const MIN_REMOTE_DELAY_MS: u64 = 3000;

fn default_remote_delay_ms() -> u64 {
    MIN_REMOTE_DELAY_MS
}

fn default_max_batch_size() -> usize {
    10
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::default(),
            output_format: OutputFormat::default(),
            quality: default_quality(),
            remote_delay_ms: default_remote_delay_ms(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

/// Processing service endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Base URL of the self-hosted backend
    #[serde(default = "default_local_url")]
    pub local_url: String,
    /// Base URL of the hosted API
    #[serde(default = "default_remote_url")]
    pub remote_url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_local_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_remote_url() -> String {
    "https://api.withoutbg.com/api".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            local_url: default_local_url(),
            remote_url: default_remote_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServiceConfig {
    /// Base URL for the given mode.
    pub fn base_url(&self, mode: ProcessingMode) -> &str {
        match mode {
            ProcessingMode::Local => &self.local_url,
            ProcessingMode::Remote => &self.remote_url,
        }
    }
}

/// Local persistence settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// JSON file holding the remembered API key and cached counters
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(env::temp_dir)
        .join("cutout")
        .join("settings.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
        }
    }
}

/// Repository star counter settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PopularityConfig {
    /// Whether the counter is fetched at all
    #[serde(default = "default_popularity_enabled")]
    pub enabled: bool,
    /// `owner/name` of the repository
    #[serde(default = "default_repository")]
    pub repository: String,
    /// Repository-hosting API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// How long a fetched count stays valid, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_popularity_enabled() -> bool {
    true
}

fn default_repository() -> String {
    "withoutbg/withoutbg".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_ttl_secs() -> u64 {
    60 * 60
}

impl Default for PopularityConfig {
    fn default() -> Self {
        Self {
            enabled: default_popularity_enabled(),
            repository: default_repository(),
            api_base: default_api_base(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// Status server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the status server listens on
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7879".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub popularity: PopularityConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - CUTOUT_MODE -> processing.mode
    /// - CUTOUT_OUTPUT_FORMAT -> processing.output_format
    /// - CUTOUT_QUALITY -> processing.quality
    /// - CUTOUT_REMOTE_DELAY_MS -> processing.remote_delay_ms
    /// - CUTOUT_LOCAL_URL -> service.local_url
    /// - CUTOUT_REMOTE_URL -> service.remote_url
    /// - CUTOUT_SETTINGS_PATH -> storage.settings_path
    /// - CUTOUT_STATUS_BIND -> server.bind
    ///
    /// Values that fail to parse leave the existing value in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CUTOUT_MODE") {
            if let Ok(mode) = val.parse::<ProcessingMode>() {
                self.processing.mode = mode;
            }
        }

        if let Ok(val) = env::var("CUTOUT_OUTPUT_FORMAT") {
            if let Ok(format) = val.parse::<OutputFormat>() {
                self.processing.output_format = format;
            }
        }

        if let Ok(val) = env::var("CUTOUT_QUALITY") {
            if let Ok(quality) = val.parse::<u8>() {
                self.processing.quality = quality;
            }
        }

        if let Ok(val) = env::var("CUTOUT_REMOTE_DELAY_MS") {
            if let Ok(delay) = val.parse::<u64>() {
                self.processing.remote_delay_ms = delay;
            }
        }

        if let Ok(val) = env::var("CUTOUT_LOCAL_URL") {
            if !val.trim().is_empty() {
                self.service.local_url = val;
            }
        }

        if let Ok(val) = env::var("CUTOUT_REMOTE_URL") {
            if !val.trim().is_empty() {
                self.service.remote_url = val;
            }
        }

        if let Ok(val) = env::var("CUTOUT_SETTINGS_PATH") {
            if !val.trim().is_empty() {
                self.storage.settings_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("CUTOUT_STATUS_BIND") {
            if !val.trim().is_empty() {
                self.server.bind = val;
            }
        }
    }

    /// Reject values that parse but cannot be used
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.processing.quality) {
            return Err(ConfigError::Invalid(format!(
                "processing.quality must be between 1 and 100, got {}",
                self.processing.quality
            )));
        }
        if self.processing.remote_delay_ms < MIN_REMOTE_DELAY_MS {
            return Err(ConfigError::Invalid(format!(
                "processing.remote_delay_ms must be at least {}, got {}",
                MIN_REMOTE_DELAY_MS, self.processing.remote_delay_ms
            )));
        }
        if self.processing.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "processing.max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("CUTOUT_MODE");
        env::remove_var("CUTOUT_OUTPUT_FORMAT");
        env::remove_var("CUTOUT_QUALITY");
        env::remove_var("CUTOUT_REMOTE_DELAY_MS");
        env::remove_var("CUTOUT_LOCAL_URL");
        env::remove_var("CUTOUT_REMOTE_URL");
        env::remove_var("CUTOUT_SETTINGS_PATH");
        env::remove_var("CUTOUT_STATUS_BIND");
    }

    fn mode_strategy() -> impl Strategy<Value = ProcessingMode> {
        prop_oneof![Just(ProcessingMode::Local), Just(ProcessingMode::Remote)]
    }

    fn format_strategy() -> impl Strategy<Value = OutputFormat> {
        prop_oneof![
            Just(OutputFormat::Png),
            Just(OutputFormat::Webp),
            Just(OutputFormat::Jpg),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_processing_section(
            mode in mode_strategy(),
            format in format_strategy(),
            quality in 1u8..=100,
            delay in MIN_REMOTE_DELAY_MS..60_000,
            max_batch in 1usize..64,
        ) {
            let toml_str = format!(
                r#"
[processing]
mode = "{}"
output_format = "{}"
quality = {}
remote_delay_ms = {}
max_batch_size = {}
"#,
                mode, format, quality, delay, max_batch
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.processing.mode, mode);
            prop_assert_eq!(config.processing.output_format, format);
            prop_assert_eq!(config.processing.quality, quality);
            prop_assert_eq!(config.processing.remote_delay_ms, delay);
            prop_assert_eq!(config.processing.max_batch_size, max_batch);
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_env_overrides_mode(
            initial in mode_strategy(),
            override_mode in mode_strategy(),
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[processing]\nmode = \"{}\"\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CUTOUT_MODE", override_mode.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.processing.mode, override_mode);
        }

        #[test]
        fn prop_env_overrides_remote_delay(
            initial in 0u64..10_000,
            override_delay in 0u64..10_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[processing]\nremote_delay_ms = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CUTOUT_REMOTE_DELAY_MS", override_delay.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.processing.remote_delay_ms, override_delay);
        }

        #[test]
        fn prop_env_overrides_quality(
            initial in 1u8..=100,
            override_quality in 1u8..=100,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[processing]\nquality = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CUTOUT_QUALITY", override_quality.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.processing.quality, override_quality);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.processing.mode, ProcessingMode::Local);
        assert_eq!(config.processing.output_format, OutputFormat::Png);
        assert_eq!(config.processing.quality, 95);
        assert_eq!(config.processing.remote_delay_ms, 3000);
        assert_eq!(config.processing.max_batch_size, 10);
        assert_eq!(config.service.local_url, "http://localhost:8000/api");
        assert_eq!(config.popularity.repository, "withoutbg/withoutbg");
        assert_eq!(config.popularity.ttl_secs, 3600);
        assert_eq!(config.server.bind, "127.0.0.1:7879");
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[service]
remote_url = "https://example.test/api"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.service.remote_url, "https://example.test/api");
        assert_eq!(config.service.local_url, "http://localhost:8000/api");
        assert_eq!(config.service.request_timeout_secs, 120);
        assert_eq!(config.processing.quality, 95);
    }

    #[test]
    fn test_api_is_alias_for_remote() {
        let config = Config::parse_toml("[processing]\nmode = \"api\"\n").unwrap();
        assert_eq!(config.processing.mode, ProcessingMode::Remote);
        assert_eq!("API".parse::<ProcessingMode>().unwrap(), ProcessingMode::Remote);
    }

    #[test]
    fn test_invalid_env_value_keeps_existing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("CUTOUT_MODE", "carrier-pigeon");
        env::set_var("CUTOUT_QUALITY", "lots");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.processing.mode, ProcessingMode::Local);
        assert_eq!(config.processing.quality, 95);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.processing.quality = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.processing.max_batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_enforces_remote_delay_floor() {
        let mut config = Config::default();
        config.processing.remote_delay_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.processing.remote_delay_ms = MIN_REMOTE_DELAY_MS - 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.processing.remote_delay_ms = MIN_REMOTE_DELAY_MS;
        assert!(config.validate().is_ok());

        config.processing.remote_delay_ms = 5000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_service_base_url_follows_mode() {
        let service = ServiceConfig::default();
        assert_eq!(service.base_url(ProcessingMode::Local), service.local_url);
        assert_eq!(service.base_url(ProcessingMode::Remote), service.remote_url);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/cutout/config.toml")
            .expect("missing file falls back to defaults");
        assert_eq!(config.processing, ProcessingConfig::default());
    }
}
