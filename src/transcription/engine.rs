//! # Transcription Engine
//!
//! The [`Transcriber`] trait is what the HTTP layer talks to: hand it the
//! path of a staged audio file, get text back. It is object-safe and
//! `Send + Sync` so the app state can hold an `Arc<dyn Transcriber>` and tests
//! can swap in a fake.
//!
//! [`WhisperTranscriber`] is the production implementation. It owns the single
//! loaded [`WhisperModel`] for the life of the process.
//!
//! ## Concurrency:
//! Whisper decoding mutates per-call caches inside the model, so calls are
//! serialized behind a `Mutex`. Callers run `transcribe` on a blocking thread;
//! how many may queue up is bounded by the app state, not here.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::audio::decoder;
use crate::config::ModelsConfig;
use crate::device;
use crate::transcription::language;
use crate::transcription::model::{ModelFiles, ModelSize, WhisperModel};

/// Ways a single transcription can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// The file could not be read or decoded as audio
    Decode(String),

    /// The model itself failed (tensor ops, tokenizer)
    Model(String),

    /// The caller gave up (timeout) and raised the cancel flag
    Cancelled,
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::Decode(msg) => write!(f, "{}", msg),
            InferenceError::Model(msg) => write!(f, "{}", msg),
            InferenceError::Cancelled => write!(f, "Transcription was cancelled"),
        }
    }
}

impl std::error::Error for InferenceError {}

impl From<candle_core::Error> for InferenceError {
    fn from(err: candle_core::Error) -> Self {
        InferenceError::Model(err.to_string())
    }
}

/// Cooperative cancellation shared between a request and its inference task.
///
/// Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is raised.
    pub fn check(&self) -> Result<(), InferenceError> {
        if self.is_cancelled() {
            Err(InferenceError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A guard that raises the flag when dropped.
    ///
    /// Held by the awaiting side so that a dropped request (client gone)
    /// stops the worker as surely as a timeout does.
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

/// Raises its [`CancelFlag`] on drop.
#[derive(Debug)]
pub struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// What the health endpoint reports about the loaded model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub model: String,
    pub repo: String,
    pub device: String,
    pub precision: String,
    pub language: Option<String>,
    pub multilingual: bool,
}

/// Speech-to-text over staged audio files.
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file at `audio_path`. Empty text is a valid result.
    fn transcribe(&self, audio_path: &Path, cancel: &CancelFlag) -> Result<String, InferenceError>;

    /// Static facts about the underlying model.
    fn describe(&self) -> ModelDescriptor;
}

/// The Whisper model behind a lock, plus the settings every call shares.
pub struct WhisperTranscriber {
    model: Mutex<WhisperModel>,
    language: Option<&'static str>,
    descriptor: ModelDescriptor,
}

impl WhisperTranscriber {
    /// Resolve, load and validate the configured checkpoint.
    ///
    /// Any failure here is fatal for the service: the caller is expected to
    /// abort startup rather than serve without a model.
    pub async fn load(models: &ModelsConfig) -> Result<Self> {
        let size: ModelSize = models.whisper_model.parse()?;
        let language = match &models.language {
            Some(code) => Some(
                language::normalize(code)
                    .ok_or_else(|| anyhow!("Unsupported language '{}'", code))?,
            ),
            None => None,
        };

        let device = device::create_device_from_string(&models.device);
        tracing::info!(
            "Loading Whisper {} (~{} MB) on {}",
            size,
            size.size_mb(),
            device::DeviceManager::get_device_info(&device)
        );

        let files = ModelFiles::resolve(models, size).await?;
        let device_name = device::DeviceManager::get_device_info(&device);

        let model = tokio::task::spawn_blocking(move || -> Result<WhisperModel> {
            let mut model = WhisperModel::load(&files, size, device)?;
            model.validate()?;
            Ok(model)
        })
        .await
        .context("Model loading task panicked")??;

        if let Some(code) = language {
            if model.language_token_id(code).is_none() {
                return Err(anyhow!("Whisper {} has no token for language '{}'", size, code));
            }
        }

        let descriptor = ModelDescriptor {
            model: size.to_string(),
            repo: size.repo_name().to_string(),
            device: device_name,
            precision: "f32".to_string(),
            language: language.map(str::to_string),
            multilingual: model.is_multilingual(),
        };

        Ok(Self {
            model: Mutex::new(model),
            language,
            descriptor,
        })
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio_path: &Path, cancel: &CancelFlag) -> Result<String, InferenceError> {
        let pcm = decoder::decode_file(audio_path)?;
        cancel.check()?;

        let mut model = self
            .model
            .lock()
            .map_err(|_| InferenceError::Model("Model lock poisoned by an earlier panic".to_string()))?;
        model.transcribe(&pcm, self.language, cancel)
    }

    fn describe(&self) -> ModelDescriptor {
        self.descriptor.clone()
    }
}

#[cfg(test)]
pub mod testing {
    //! A zero-weight stand-in for the Whisper model.

    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    /// What the fake does when called.
    #[derive(Debug, Clone)]
    pub enum FakeBehavior {
        /// Return this text without looking at the file
        Reply(String),
        /// Decode the file for real, then return this text
        DecodeThenReply(String),
        /// Fail as the model would
        Fail(String),
        /// Sleep in small steps until cancelled or the duration passes
        Stall(Duration),
    }

    /// What the fake saw for one call.
    #[derive(Debug, Clone)]
    pub struct SeenFile {
        pub path: PathBuf,
        pub existed: bool,
        pub contents: Vec<u8>,
    }

    pub struct FakeTranscriber {
        behavior: FakeBehavior,
        seen: Mutex<Vec<SeenFile>>,
    }

    impl FakeTranscriber {
        pub fn new(behavior: FakeBehavior) -> Self {
            Self {
                behavior,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn seen(&self) -> Vec<SeenFile> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Transcriber for FakeTranscriber {
        fn transcribe(&self, audio_path: &Path, cancel: &CancelFlag) -> Result<String, InferenceError> {
            self.seen.lock().unwrap().push(SeenFile {
                path: audio_path.to_path_buf(),
                existed: audio_path.exists(),
                contents: std::fs::read(audio_path).unwrap_or_default(),
            });

            match &self.behavior {
                FakeBehavior::Reply(text) => Ok(text.clone()),
                FakeBehavior::DecodeThenReply(text) => {
                    decoder::decode_file(audio_path)?;
                    Ok(text.clone())
                }
                FakeBehavior::Fail(msg) => Err(InferenceError::Model(msg.clone())),
                FakeBehavior::Stall(duration) => {
                    let step = Duration::from_millis(10);
                    let mut waited = Duration::ZERO;
                    while waited < *duration {
                        cancel.check()?;
                        std::thread::sleep(step);
                        waited += step;
                    }
                    Ok(String::new())
                }
            }
        }

        fn describe(&self) -> ModelDescriptor {
            ModelDescriptor {
                model: "fake".to_string(),
                repo: "local/fake".to_string(),
                device: "CPU".to_string(),
                precision: "f32".to_string(),
                language: None,
                multilingual: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeBehavior, FakeTranscriber};
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());

        other.cancel();
        assert!(flag.is_cancelled());
        assert_eq!(flag.check(), Err(InferenceError::Cancelled));
    }

    #[test]
    fn test_guard_raises_flag_on_drop() {
        let flag = CancelFlag::new();
        let guard = flag.cancel_on_drop();
        assert!(!flag.is_cancelled());

        drop(guard);
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_stalled_transcription_stops_when_cancelled() {
        let fake = Arc::new(FakeTranscriber::new(FakeBehavior::Stall(Duration::from_secs(30))));
        let file = tempfile::NamedTempFile::new().unwrap();
        let flag = CancelFlag::new();

        let worker = {
            let fake = Arc::clone(&fake);
            let flag = flag.clone();
            let path = file.path().to_path_buf();
            std::thread::spawn(move || fake.transcribe(&path, &flag))
        };

        std::thread::sleep(Duration::from_millis(30));
        flag.cancel();
        assert_eq!(worker.join().unwrap(), Err(InferenceError::Cancelled));
    }

    #[test]
    fn test_transcriber_is_object_safe() {
        let transcriber: Arc<dyn Transcriber> =
            Arc::new(FakeTranscriber::new(FakeBehavior::Reply("hello".into())));
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(transcriber.transcribe(file.path(), &CancelFlag::new()).unwrap(), "hello");
        assert_eq!(transcriber.describe().model, "fake");
    }
}
