use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data API settings
    pub api: ApiConfig,

    /// Harvest run settings
    pub harvest: HarvestConfig,

    /// Local transcription fallback settings
    pub transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key; the --api-key flag and YOUTUBE_API_KEY env override this
    pub api_key: Option<String>,

    /// Per-request timeout for every upstream HTTP call
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Where the JSONL outputs and the ledger live
    pub output_dir: PathBuf,

    /// Lookback window in years
    pub lookback_years: u32,

    /// Concurrent per-video workers
    pub workers: usize,

    /// Pause between caption fetches, in milliseconds
    pub caption_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Whether caption misses fall back to local transcription
    pub local_fallback: bool,

    /// Whisper model size (quality/latency trade-off)
    pub model: String,

    /// Whisper CLI binary
    pub whisper_path: String,

    /// yt-dlp binary, used for caption probing and audio download
    pub yt_dlp_path: String,

    /// Concurrent local transcription jobs; the model load is memory-bound,
    /// so raise this only when the machine can hold several copies
    pub max_concurrent_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                api_key: None,
                request_timeout_secs: 30,
            },
            harvest: HarvestConfig {
                output_dir: PathBuf::from("output"),
                lookback_years: 2,
                workers: 4,
                caption_delay_ms: 1500,
            },
            transcription: TranscriptionConfig {
                local_fallback: true,
                model: "base".to_string(),
                whisper_path: "whisper".to_string(),
                yt_dlp_path: "yt-dlp".to_string(),
                max_concurrent_jobs: 1,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("channel-harvester").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.harvest.lookback_years == 0 {
            anyhow::bail!("lookback_years must be at least 1");
        }
        if self.harvest.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.api.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        if self.transcription.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be at least 1");
        }
        Ok(())
    }

    /// The credential for the Data API: a CLI/env override wins over the
    /// config file.
    pub fn resolve_api_key(&self, override_key: Option<String>) -> Result<String> {
        override_key
            .or_else(|| self.api.api_key.clone())
            .filter(|key| !key.is_empty())
            .context(
                "no API key configured - pass --api-key, set YOUTUBE_API_KEY, \
                 or add api.api_key to the config file",
            )
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!(
            "  API Key: {}",
            if self.api.api_key.is_some() { "configured" } else { "not set" }
        );
        println!("  Request Timeout: {}s", self.api.request_timeout_secs);
        println!("  Output Dir: {}", self.harvest.output_dir.display());
        println!("  Lookback: {} years", self.harvest.lookback_years);
        println!("  Workers: {}", self.harvest.workers);
        println!("  Local Fallback: {}", self.transcription.local_fallback);
        println!("  Whisper Model: {}", self.transcription.model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.harvest.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.harvest.lookback_years, config.harvest.lookback_years);
        assert_eq!(back.transcription.model, config.transcription.model);
    }

    #[test]
    fn test_resolve_api_key_prefers_override() {
        let mut config = Config::default();
        config.api.api_key = Some("from-file".to_string());
        let key = config.resolve_api_key(Some("from-cli".to_string())).unwrap();
        assert_eq!(key, "from-cli");
        let key = config.resolve_api_key(None).unwrap();
        assert_eq!(key, "from-file");
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let config = Config::default();
        assert!(config.resolve_api_key(None).is_err());
        assert!(config.resolve_api_key(Some(String::new())).is_err());
    }
}
