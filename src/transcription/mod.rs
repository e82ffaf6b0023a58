//! # Transcription Module
//!
//! Speech-to-text for staged uploads using Whisper models via Candle-rs.
//!
//! ## Key Components:
//! - **Transcriber trait**: the seam the HTTP layer calls; one implementation per backend
//! - **Whisper model**: checkpoint resolution, weight loading, greedy decoding
//! - **Mel filter bank**: log-mel front end shared by every model size
//! - **Languages**: the language tokens Whisper knows, for detection
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, the default; a good fit for CPU-only hosts
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, handles technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine;      // Transcriber trait and the Whisper-backed implementation
pub mod language;    // Whisper language codes
pub mod mel;         // Mel filter bank
pub mod model;       // Whisper model loading and decoding

pub use engine::{CancelFlag, InferenceError, Transcriber, WhisperTranscriber};
