use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::station::{StationId, StationOverrides};

const APP_DIR: &str = "web3radio";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub prices: PricesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stations: StationOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub default_station: StationId,
    /// Startup volume, 0..=100.
    #[serde(default = "default_volume")]
    pub volume: i32,
    /// How long a stream may take to produce its first audio.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricesConfig {
    #[serde(default = "default_prices_enabled")]
    pub enabled: bool,
    /// Base URL of a CoinGecko-compatible API.
    #[serde(default = "default_prices_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_station: StationId::default(),
            volume: default_volume(),
            connect_timeout_secs: default_connect_timeout_secs(),
            ffmpeg_path: default_ffmpeg_path(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            enabled: default_prices_enabled(),
            endpoint: default_prices_endpoint(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            file: default_log_file(),
        }
    }
}

fn default_volume() -> i32 {
    50
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_user_agent() -> String {
    concat!("web3radio/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_prices_enabled() -> bool {
    true
}

fn default_prices_endpoint() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_log_filter() -> String {
    "info,hyper=warn,reqwest=warn".to_string()
}

fn default_log_file() -> PathBuf {
    data_dir().join("web3radio.log")
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    pub fn metadata_interval(&self) -> Duration {
        Duration::from_secs(self.metadata.interval_secs.max(1))
    }

    pub fn price_interval(&self) -> Duration {
        Duration::from_secs(self.prices.interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.player.connect_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.player.default_station, StationId::Web3);
        assert_eq!(config.player.volume, 50);
        assert_eq!(config.metadata_interval(), Duration::from_secs(10));
        assert_eq!(config.price_interval(), Duration::from_secs(10));
        assert!(config.prices.enabled);
        assert!(config.stations.delta.is_empty());
    }

    #[test]
    fn partial_sections_are_merged_with_defaults() {
        let config = Config::from_toml_str(
            r#"
            [player]
            default_station = "delta"
            volume = 80

            [prices]
            enabled = false

            [stations.venus]
            now_playing_url = "https://example.org/api/nowplaying/venus"
            "#,
        )
        .unwrap();
        assert_eq!(config.player.default_station, StationId::Delta);
        assert_eq!(config.player.volume, 80);
        assert_eq!(config.player.ffmpeg_path, "ffmpeg");
        assert!(!config.prices.enabled);
        assert_eq!(config.prices.endpoint, "https://api.coingecko.com/api/v3");
        assert_eq!(
            config.stations.venus.now_playing_url.as_deref(),
            Some("https://example.org/api/nowplaying/venus")
        );
        assert!(config.stations.venus.stream_url.is_none());
    }

    #[test]
    fn zero_intervals_are_floored() {
        let config = Config::from_toml_str("[metadata]\ninterval_secs = 0\n").unwrap();
        assert_eq!(config.metadata_interval(), Duration::from_secs(1));
    }

    #[test]
    fn defaults_survive_a_toml_round_trip() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.player.volume, 50);
        assert_eq!(back.logging.filter, default_log_filter());
    }

    #[test]
    fn unknown_station_is_rejected() {
        assert!(Config::from_toml_str("[player]\ndefault_station = \"nowhere\"\n").is_err());
    }
}
