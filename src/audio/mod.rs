//! # Audio Handling Module
//!
//! Everything between "bytes a client uploaded" and "samples the model eats".
//!
//! ## Key Components:
//! - **Format sniffing**: Recognise the container from its magic bytes so the
//!   staged file gets a matching extension
//! - **Decoder**: Read a staged file with symphonia, mix to mono, resample to 16 kHz
//!
//! ## Model Input Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Channels**: Mono (1 channel)
//! - **Sample format**: 32-bit float in [-1.0, 1.0]

pub mod decoder;      // File decoding and resampling
pub mod format;       // Container detection from magic bytes
