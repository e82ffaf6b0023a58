//! Decode a staged audio file into 16 kHz mono f32 samples.
//!
//! Containers and codecs are whatever symphonia was built with (WAV, MP3,
//! AAC/M4A, FLAC, Ogg Vorbis, Matroska/WebM with a supported codec). The
//! file extension is passed as a probe hint only; the probe still checks the
//! content.

use std::fs::File;
use std::path::Path;

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::transcription::InferenceError;

/// Sample rate the model expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

const RESAMPLE_CHUNK: usize = 1024;

/// Read and decode the file at `path`.
pub fn decode_file(path: &Path) -> Result<Vec<f32>, InferenceError> {
    let file = File::open(path)
        .map_err(|e| InferenceError::Decode(format!("cannot open {}: {}", path.display(), e)))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let (samples, source_rate) = decode_stream(mss, &hint)?;

    tracing::debug!(
        "Decoded {} samples at {} Hz from {}",
        samples.len(),
        source_rate,
        path.display()
    );

    if source_rate == TARGET_SAMPLE_RATE {
        Ok(samples)
    } else {
        resample(&samples, source_rate, TARGET_SAMPLE_RATE)
    }
}

/// Decode the first audio track to mono samples at its native rate.
fn decode_stream(mss: MediaSourceStream, hint: &Hint) -> Result<(Vec<f32>, u32), InferenceError> {
    let probed = symphonia::default::get_probe()
        .format(hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| InferenceError::Decode(format!("unrecognised audio format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| InferenceError::Decode("no audio track found".to_string()))?;
    let track_id = track.id;
    let mut source_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| InferenceError::Decode(format!("unsupported codec: {}", e)))?;

    let mut mono: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(InferenceError::Decode(format!("failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // A corrupt frame; skip it like a player would.
                tracing::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(InferenceError::Decode(format!("decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        source_rate.get_or_insert(spec.rate);
        let channels = spec.channels.count().max(1);

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        let samples = buffer.samples();

        if channels == 1 {
            mono.extend_from_slice(samples);
        } else {
            mono.extend(
                samples
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    if mono.is_empty() {
        return Err(InferenceError::Decode("no audio samples decoded".to_string()));
    }

    let source_rate = source_rate
        .ok_or_else(|| InferenceError::Decode("audio stream has no sample rate".to_string()))?;
    Ok((mono, source_rate))
}

/// Resample mono audio with a windowed-sinc resampler.
///
/// The sinc filter delays its output by `output_delay()` frames, so those are
/// skipped and the tail is flushed out with empty input before trimming to
/// the exact expected length.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, InferenceError> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| InferenceError::Decode(format!("resampler init failed: {}", e)))?;

    let delay = resampler.output_delay();
    let expected_len = (samples.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(delay + expected_len + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let resampled = resampler
            .process(&[chunk], None)
            .map_err(|e| InferenceError::Decode(format!("resampling failed: {}", e)))?;
        if let Some(channel) = resampled.first() {
            output.extend_from_slice(channel);
        }
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let resampled = resampler
            .process_partial(Some(&[remainder][..]), None)
            .map_err(|e| InferenceError::Decode(format!("resampling failed: {}", e)))?;
        if let Some(channel) = resampled.first() {
            output.extend_from_slice(channel);
        }
    }

    // Flush what is still inside the filter.
    while output.len() < delay + expected_len {
        let flush: Option<&[Vec<f32>]> = None;
        let resampled = resampler
            .process_partial(flush, None)
            .map_err(|e| InferenceError::Decode(format!("resampling failed: {}", e)))?;
        match resampled.first() {
            Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
            _ => break,
        }
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected_len);
    Ok(output)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! WAV builders shared by decoder and endpoint tests.

    use std::io::Cursor;

    /// 16-bit PCM WAV holding a sine tone (or silence with `amplitude = 0`).
    pub fn wav_bytes(sample_rate: u32, channels: u16, seconds: f32, amplitude: f32) -> Vec<u8> {
        let frames = (sample_rate as f32 * seconds) as usize;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let value = (t * 440.0 * std::f32::consts::TAU).sin() * amplitude * i16::MAX as f32;
            for _ in 0..channels {
                samples.push(value as i16);
            }
        }

        let header = wav::Header::new(wav::WAV_FORMAT_PCM, channels, sample_rate, 16);
        let mut cursor = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut cursor).unwrap();
        cursor.into_inner()
    }
}
