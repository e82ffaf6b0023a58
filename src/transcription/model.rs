//! # Whisper Model Management
//!
//! Loads one Whisper checkpoint with Candle-rs and turns 16 kHz mono PCM
//! into text.
//!
//! ## Model Loading Process:
//! 1. Resolve `config.json`, `tokenizer.json` and `model.safetensors` from a
//!    local directory, the Hugging Face cache, or a hub download
//! 2. Load the tokenizer and look up the special tokens we decode with
//! 3. Memory-map the weights in F32 on the selected device
//! 4. Validate the model end to end on one second of silence
//!
//! ## Decoding:
//! Audio is cut into 30 s mel windows. Each window is decoded greedily
//! (temperature 0) with timestamps suppressed, so the same file always yields
//! the same text. Windows that look like silence are dropped.

use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::{ops::softmax, VarBuilder};
use candle_transformers::models::whisper::{self as m, audio, Config};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::config::ModelsConfig;
use crate::transcription::engine::{CancelFlag, InferenceError};
use crate::transcription::language::{self, LANGUAGES};
use crate::transcription::mel;

/// Available Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Get the HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Get the approximate model size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// On-disk locations of one checkpoint.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Find the checkpoint according to the models config.
    ///
    /// ## Sources, in order:
    /// - `model_dir`: a plain directory, never touches the network
    /// - `offline = true`: the Hugging Face cache only
    /// - otherwise: download into (or reuse) the Hugging Face cache
    pub async fn resolve(models: &ModelsConfig, size: ModelSize) -> Result<Self> {
        if let Some(dir) = &models.model_dir {
            tracing::info!("Using local model directory {:?}", dir);
            return Self::from_dir(dir);
        }

        if models.offline {
            tracing::info!("Offline mode, resolving {} from the hub cache", size.repo_name());
            return Self::from_cache(models.cache_dir.as_deref(), size);
        }

        Self::download(models.cache_dir.as_deref(), size).await
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let files = Self {
            config: dir.join(CONFIG_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
            weights: dir.join(WEIGHTS_FILE),
        };

        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.is_file() {
                return Err(anyhow!("Model file missing: {}", path.display()));
            }
        }

        Ok(files)
    }

    fn from_cache(cache_dir: Option<&Path>, size: ModelSize) -> Result<Self> {
        let cache = match cache_dir {
            Some(dir) => hf_hub::Cache::new(dir.to_path_buf()),
            None => hf_hub::Cache::default(),
        };
        let repo = cache.model(size.repo_name().to_string());

        let fetch = |name: &str| {
            repo.get(name).ok_or_else(|| {
                anyhow!("{} for {} is not in the local hub cache", name, size.repo_name())
            })
        };

        Ok(Self {
            config: fetch(CONFIG_FILE)?,
            tokenizer: fetch(TOKENIZER_FILE)?,
            weights: fetch(WEIGHTS_FILE)?,
        })
    }

    async fn download(cache_dir: Option<&Path>, size: ModelSize) -> Result<Self> {
        use hf_hub::api::tokio::ApiBuilder;

        let mut builder = ApiBuilder::new().with_progress(false);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            tracing::debug!("Using HF token (length: {})", token.len());
            builder = builder.with_token(Some(token));
        }
        if let Some(dir) = cache_dir {
            tracing::debug!("Using hub cache dir {:?}", dir);
            builder = builder.with_cache_dir(dir.to_path_buf());
        }

        let api = builder.build().context("Failed to create Hugging Face API client")?;
        let repo = api.model(size.repo_name().to_string());

        tracing::info!("Fetching model files from {}", size.repo_name());
        let mut fetched = Vec::with_capacity(3);
        for name in [CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE] {
            let path = repo
                .get(name)
                .await
                .map_err(|e| anyhow!("Failed to download {} from {}: {}", name, size.repo_name(), e))?;
            tracing::debug!("{} available at {:?}", name, path);
            fetched.push(path);
        }

        let weights = fetched.pop().ok_or_else(|| anyhow!("weights path missing"))?;
        let tokenizer = fetched.pop().ok_or_else(|| anyhow!("tokenizer path missing"))?;
        let config = fetched.pop().ok_or_else(|| anyhow!("config path missing"))?;
        Ok(Self { config, tokenizer, weights })
    }
}

/// Token ids the decoder prompt and stopping rule depend on.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    transcribe: u32,
    eot: u32,
    no_timestamps: u32,
    no_speech: Option<u32>,
}

impl SpecialTokens {
    fn lookup(tokenizer: &Tokenizer) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("Tokenizer has no {} token", token))
        };

        Ok(Self {
            sot: id(m::SOT_TOKEN)?,
            transcribe: id(m::TRANSCRIBE_TOKEN)?,
            eot: id(m::EOT_TOKEN)?,
            no_timestamps: id(m::NO_TIMESTAMPS_TOKEN)?,
            no_speech: m::NO_SPEECH_TOKENS
                .iter()
                .find_map(|token| tokenizer.token_to_id(token)),
        })
    }
}

/// Text and quality signals for one decoded 30 s window.
#[derive(Debug)]
struct DecodedWindow {
    text: String,
    avg_logprob: f64,
    no_speech_prob: f64,
}

impl DecodedWindow {
    fn is_silence(&self) -> bool {
        self.no_speech_prob > m::NO_SPEECH_THRESHOLD && self.avg_logprob < m::LOGPROB_THRESHOLD
    }
}

/// A loaded Whisper model ready for transcription.
///
/// Decoding mutates the decoder's cross-attention cache, so every call takes
/// `&mut self`; the engine serializes access.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    suppress_tokens: Tensor,
    tokens: SpecialTokens,
    /// `(code, token id)` for every language the tokenizer knows
    language_tokens: Vec<(&'static str, u32)>,
    device: Device,
}

impl WhisperModel {
    /// Load a checkpoint from resolved files.
    pub fn load(files: &ModelFiles, size: ModelSize, device: Device) -> Result<Self> {
        let start_time = std::time::Instant::now();

        let config: Config = serde_json::from_reader(
            std::fs::File::open(&files.config)
                .with_context(|| format!("Failed to open {}", files.config.display()))?,
        )
        .context("Invalid model config.json")?;
        tracing::debug!("Model config: {:?}", config);

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let tokens = SpecialTokens::lookup(&tokenizer)?;

        let language_tokens: Vec<(&'static str, u32)> = LANGUAGES
            .iter()
            .filter_map(|code| {
                tokenizer
                    .token_to_id(&language::language_token(code))
                    .map(|id| (*code, id))
            })
            .collect();

        let mel_filters = mel::mel_filter_bank(m::SAMPLE_RATE, m::N_FFT, config.num_mel_bins);

        // Config-listed tokens never appear in transcripts; with timestamps
        // off the no-timestamps marker must not be predicted either.
        let suppress: Vec<f32> = (0..config.vocab_size as u32)
            .map(|i| {
                if config.suppress_tokens.contains(&i) || i == tokens.no_timestamps {
                    f32::NEG_INFINITY
                } else {
                    0.0
                }
            })
            .collect();
        let suppress_tokens = Tensor::new(suppress.as_slice(), &device)?;

        tracing::debug!("Loading model weights from {:?}", files.weights);
        // SAFETY: the weights file is only read, and is expected to stay
        // unmodified for the life of the process.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], m::DTYPE, &device)?
        };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s ({} language tokens)",
            size,
            start_time.elapsed().as_secs_f64(),
            language_tokens.len()
        );

        Ok(Self {
            model,
            config,
            tokenizer,
            mel_filters,
            suppress_tokens,
            tokens,
            language_tokens,
            device,
        })
    }

    pub fn is_multilingual(&self) -> bool {
        !self.language_tokens.is_empty()
    }

    /// Token id for a language code, if this checkpoint knows it.
    pub fn language_token_id(&self, code: &str) -> Option<u32> {
        self.language_tokens
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, id)| *id)
    }

    /// Run the model on one second of silence to make sure it works.
    pub fn validate(&mut self) -> Result<()> {
        tracing::debug!("Validating Whisper model...");
        let silence = vec![0.0f32; m::SAMPLE_RATE];
        let text = self
            .transcribe(&silence, None, &CancelFlag::new())
            .map_err(|e| anyhow!("Model validation failed: {}", e))?;
        tracing::debug!("Model validation successful, test result: '{}'", text);
        Ok(())
    }

    /// Transcribe 16 kHz mono samples.
    ///
    /// ## Parameters:
    /// - **pcm**: samples in [-1.0, 1.0] at 16 kHz
    /// - **language**: forced language code; `None` detects it on multilingual models
    /// - **cancel**: checked between decoder steps
    ///
    /// ## Returns:
    /// The concatenated text of all non-silent windows, trimmed. Silence gives `""`.
    pub fn transcribe(
        &mut self,
        pcm: &[f32],
        language: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<String, InferenceError> {
        let start_time = std::time::Instant::now();

        if pcm.is_empty() {
            return Err(InferenceError::Decode("Audio contains no samples".to_string()));
        }

        let mel = audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let mel_len = mel.len();
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?;
        let (_, _, content_frames) = mel.dims3()?;

        let language_token = match language {
            Some(code) => Some(self.language_token_id(code).ok_or_else(|| {
                InferenceError::Model(format!("Model has no token for language '{}'", code))
            })?),
            None if self.is_multilingual() => Some(self.detect_language(&mel, cancel)?),
            None => None,
        };

        let mut text = String::new();
        let mut seek = 0;
        while seek < content_frames {
            cancel.check()?;

            let window_size = usize::min(content_frames - seek, m::N_FRAMES);
            let window = mel.narrow(2, seek, window_size)?;
            let decoded = self.decode_window(&window, language_token, cancel)?;
            seek += window_size;

            if decoded.is_silence() {
                tracing::debug!(
                    "Skipping silent window at frame {} (no_speech={:.2}, avg_logprob={:.2})",
                    seek - window_size,
                    decoded.no_speech_prob,
                    decoded.avg_logprob
                );
                continue;
            }
            text.push_str(&decoded.text);
        }

        tracing::debug!(
            "Transcribed {:.2}s of audio in {:.2}s",
            pcm.len() as f64 / m::SAMPLE_RATE as f64,
            start_time.elapsed().as_secs_f64()
        );

        Ok(text.trim().to_string())
    }

    /// Pick the most likely language token from the first decoder step.
    fn detect_language(&mut self, mel: &Tensor, cancel: &CancelFlag) -> Result<u32, InferenceError> {
        cancel.check()?;

        let (_, _, frames) = mel.dims3()?;
        let mel = mel.narrow(2, 0, usize::min(frames, self.config.max_source_positions))?;
        let audio_features = self.model.encoder.forward(&mel, true)?;

        let ids: Vec<u32> = self.language_tokens.iter().map(|(_, id)| *id).collect();
        let ids = Tensor::new(ids.as_slice(), &self.device)?;
        let prompt = Tensor::new(&[[self.tokens.sot]], &self.device)?;

        let ys = self.model.decoder.forward(&prompt, &audio_features, true)?;
        let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
        let probs = softmax(&logits.index_select(&ids, 0)?, D::Minus1)?.to_vec1::<f32>()?;

        let (best, prob) = probs
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best });
        let (code, id) = self.language_tokens[best];
        tracing::debug!("Detected language '{}' (p={:.2})", code, prob);

        Ok(id)
    }

    /// Greedy decode of one mel window.
    fn decode_window(
        &mut self,
        mel: &Tensor,
        language_token: Option<u32>,
        cancel: &CancelFlag,
    ) -> Result<DecodedWindow, InferenceError> {
        let audio_features = self.model.encoder.forward(mel, true)?;
        let sample_len = self.config.max_target_positions / 2;

        let mut tokens = vec![self.tokens.sot];
        if let Some(language_token) = language_token {
            tokens.push(language_token);
        }
        tokens.push(self.tokens.transcribe);
        tokens.push(self.tokens.no_timestamps);
        let prompt_len = tokens.len();

        let mut sum_logprob = 0f64;
        let mut no_speech_prob = f64::NAN;

        for i in 0..sample_len {
            cancel.check()?;

            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            if i == 0 {
                if let Some(no_speech) = self.tokens.no_speech {
                    let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                    no_speech_prob = softmax(&logits, 0)?
                        .i(no_speech as usize)?
                        .to_scalar::<f32>()? as f64;
                }
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress_tokens)?;

            let next_token = logits.argmax(0)?.to_scalar::<u32>()?;
            let prob = softmax(&logits, D::Minus1)?
                .i(next_token as usize)?
                .to_scalar::<f32>()? as f64;

            tokens.push(next_token);
            if next_token == self.tokens.eot || tokens.len() > self.config.max_target_positions {
                break;
            }
            sum_logprob += prob.ln();
        }

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| InferenceError::Model(format!("Tokenizer decode error: {}", e)))?;

        Ok(DecodedWindow {
            text,
            avg_logprob: sum_logprob / tokens.len() as f64,
            no_speech_prob,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("base".parse::<ModelSize>().unwrap(), ModelSize::Base);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert_eq!(" tiny ".parse::<ModelSize>().unwrap(), ModelSize::Tiny);
        assert!("invalid".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_size_repo() {
        assert_eq!(ModelSize::Base.repo_name(), "openai/whisper-base");
        assert_eq!(ModelSize::Base.to_string(), "base");
        assert_eq!(ModelSize::Medium.size_mb(), 769);
    }

    #[test]
    fn test_model_files_from_dir_requires_all_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), "{}").unwrap();

        let err = ModelFiles::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains(WEIGHTS_FILE));

        std::fs::write(dir.path().join(WEIGHTS_FILE), b"").unwrap();
        let files = ModelFiles::from_dir(dir.path()).unwrap();
        assert_eq!(files.weights, dir.path().join(WEIGHTS_FILE));
    }

    #[test]
    fn test_load_rejects_corrupt_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "not json").unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), "{}").unwrap();
        std::fs::write(dir.path().join(WEIGHTS_FILE), b"").unwrap();

        let files = ModelFiles::from_dir(dir.path()).unwrap();
        assert!(WhisperModel::load(&files, ModelSize::Base, Device::Cpu).is_err());
    }

    #[test]
    fn test_offline_cache_miss_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelFiles::from_cache(Some(dir.path()), ModelSize::Tiny).unwrap_err();
        assert!(err.to_string().contains("not in the local hub cache"));
    }
}
