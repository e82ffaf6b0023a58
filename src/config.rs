//! # Configuration Management
//!
//! Settings for the transcription service are layered from several sources:
//! - Built-in defaults (the values the service was designed around)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP_` prefix
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: `Serialize`/`Deserialize` let the `config` crate round-trip our structs
//! - **Option<T>**: Settings that are legitimately "unset" (local model dir, language) are `Option`
//! - **#[serde(default)]**: Missing keys in a partial `config.toml` fall back to defaults
//! - **Result<T, E>**: Loading and validation both report failures instead of panicking
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_MODELS__WHISPER_MODEL`, ...)
//! 3. Configuration file (`config.toml`)
//! 4. Default values (defined in the Default impls)
//!
//! Nested keys use a double underscore so that field names containing `_`
//! (like `whisper_model`) survive the environment mapping.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::transcription::model::ModelSize;

/// Main application configuration.
///
/// ## Groups:
/// - `server`: where we listen and who may call us from a browser
/// - `models`: which Whisper checkpoint to load and from where
/// - `performance`: how many uploads may wait for the model and for how long
/// - `staging`: where uploaded bytes are written before inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub performance: PerformanceConfig,
    pub staging: StagingConfig,
}

/// HTTP server settings.
///
/// ## Fields:
/// - `host` / `port`: bind address
/// - `allowed_origins`: browser origins allowed to POST uploads (CORS)
/// - `max_upload_bytes`: largest upload accepted before answering 413
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

/// Speech model settings.
///
/// ## Fields:
/// - `whisper_model`: capacity class ("tiny", "base", "small", "medium", "large")
/// - `device`: compute device preference; CPU unless told otherwise
/// - `model_dir`: directory holding `config.json`, `tokenizer.json` and
///   `model.safetensors`; when set, the hub is never contacted
/// - `cache_dir`: Hugging Face cache location (defaults to the hub's own)
/// - `offline`: only use files already present in the cache
/// - `language`: force a language ("en", "fr", ...); `None` detects it per upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub device: String,
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub language: Option<String>,
}

/// Inference admission settings.
///
/// ## Fields:
/// - `max_pending_requests`: uploads allowed to wait for or hold the model at once;
///   anything beyond is turned away with 503
/// - `inference_timeout_secs`: per-upload ceiling on inference time (504 when exceeded)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_pending_requests: usize,
    pub inference_timeout_secs: u64,
}

/// Temp-file staging settings.
///
/// ## Fields:
/// - `temp_dir`: where staged uploads go (`None` = OS temp directory)
/// - `default_suffix`: extension used when the upload's format can't be recognised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    pub default_suffix: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                allowed_origins: vec![
                    "http://localhost:3000".to_string(),
                    "https://your-company-website.com".to_string(),
                ],
                max_upload_bytes: 100 * 1024 * 1024,  // 100 MB
            },
            models: ModelsConfig {
                whisper_model: "base".to_string(),
                device: "cpu".to_string(),
                model_dir: None,
                cache_dir: None,
                offline: false,
                language: None,
            },
            performance: PerformanceConfig {
                max_pending_requests: 8,
                inference_timeout_secs: 600,
            },
            staging: StagingConfig {
                temp_dir: None,
                default_suffix: ".wav".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`
    /// - `APP_SERVER__ALLOWED_ORIGINS=http://localhost:5173,https://app.example.com`
    /// - `APP_MODELS__WHISPER_MODEL=small`
    /// - `APP_MODELS__MODEL_DIR=/srv/models/whisper-base`
    /// - `HOST=0.0.0.0` / `PORT=3000`: deployment platform shortcuts
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Same as [`AppConfig::load`] but with an explicit config file stem.
    pub fn load_from(file_stem: &str) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Port is not 0 and at least one CORS origin is configured
    /// - Upload limit, pending-request bound and timeout are all non-zero
    /// - The model capacity class is one we know how to load
    /// - The fallback suffix looks like an extension (".wav", not "wav")
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.allowed_origins.is_empty() {
            return Err(anyhow::anyhow!("At least one allowed origin must be configured"));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.performance.max_pending_requests == 0 {
            return Err(anyhow::anyhow!("Max pending requests must be greater than 0"));
        }

        if self.performance.inference_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Inference timeout must be greater than 0"));
        }

        self.model_size()?;

        if !self.staging.default_suffix.starts_with('.') || self.staging.default_suffix.len() < 2 {
            return Err(anyhow::anyhow!(
                "Default staging suffix must start with '.', got {:?}",
                self.staging.default_suffix
            ));
        }

        Ok(())
    }

    /// The configured capacity class, parsed.
    pub fn model_size(&self) -> Result<ModelSize> {
        self.models.whisper_model.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.models.whisper_model, "base");
        assert_eq!(config.models.device, "cpu");
        assert_eq!(config.staging.default_suffix, ".wav");
        assert_eq!(
            config.server.allowed_origins,
            vec!["http://localhost:3000", "https://your-company-website.com"]
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.model_size().unwrap(), ModelSize::Base);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.allowed_origins.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_pending_requests = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.whisper_model = "gigantic".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.staging.default_suffix = "wav".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = AppConfig::load_from("does-not-exist-anywhere").unwrap();
        assert_eq!(config.models.whisper_model, "base");
        assert!(config.models.model_dir.is_none());
        assert!(config.models.language.is_none());
        assert!(!config.models.offline);
    }

    #[test]
    fn test_load_partial_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("service");
        std::fs::write(
            stem.with_extension("toml"),
            "[models]\nwhisper_model = \"small\"\ndevice = \"cpu\"\nlanguage = \"en\"\n\n[performance]\nmax_pending_requests = 2\ninference_timeout_secs = 30\n",
        )
        .unwrap();

        let config = AppConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert_eq!(config.models.whisper_model, "small");
        assert_eq!(config.models.language.as_deref(), Some("en"));
        assert_eq!(config.performance.max_pending_requests, 2);
        assert_eq!(config.performance.inference_timeout_secs, 30);
        // Untouched sections keep their defaults
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.staging.default_suffix, ".wav");
    }
}
