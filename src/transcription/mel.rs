//! Mel filter bank for the Whisper front end.
//!
//! Whisper checkpoints were trained on log-mel features computed with
//! Slaney-scale triangular filters and Slaney area normalization (the
//! librosa defaults). The bank is derived here from the checkpoint's
//! `num_mel_bins`, so 80-bin and 128-bin models share one code path.
//!
//! The result is row-major `n_mels x (n_fft / 2 + 1)`, the layout
//! `candle_transformers::models::whisper::audio::pcm_to_mel` expects.

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz < MIN_LOG_HZ {
        hz / F_SP
    } else {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    }
}

/// Inverse of [`hz_to_mel`].
pub fn mel_to_hz(mel: f64) -> f64 {
    if mel < MIN_LOG_MEL {
        F_SP * mel
    } else {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    }
}

/// Build the filter bank.
pub fn mel_filter_bank(sample_rate: usize, n_fft: usize, n_mels: usize) -> Vec<f32> {
    let n_freqs = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    // n_mels + 2 band edges, evenly spaced on the mel scale up to Nyquist
    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_freqs];
    for m in 0..n_mels {
        let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let enorm = 2.0 / (right - left);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - left) / (center - left);
            let falling = (right - freq) / (right - center);
            let weight = rising.min(falling).max(0.0);
            filters[m * n_freqs + k] = (weight * enorm) as f32;
        }
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: usize = 16000;
    const N_FFT: usize = 400;

    #[test]
    fn test_mel_scale_breakpoint() {
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
        assert!((hz_to_mel(500.0) - 7.5).abs() < 1e-9);
        for hz in [0.0, 60.0, 999.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6, "round trip failed at {}", hz);
        }
    }

    #[test]
    fn test_filter_bank_shape() {
        for n_mels in [80, 128] {
            let filters = mel_filter_bank(SAMPLE_RATE, N_FFT, n_mels);
            assert_eq!(filters.len(), n_mels * (N_FFT / 2 + 1));
            assert!(filters.iter().all(|w| *w >= 0.0 && w.is_finite()));
        }
    }

    #[test]
    fn test_every_filter_has_support_and_peaks_move_up() {
        let n_freqs = N_FFT / 2 + 1;
        let filters = mel_filter_bank(SAMPLE_RATE, N_FFT, 80);

        let mut last_peak = 0usize;
        for m in 0..80 {
            let row = &filters[m * n_freqs..(m + 1) * n_freqs];
            let (peak, max) = row
                .iter()
                .enumerate()
                .fold((0, 0.0f32), |best, (k, &w)| if w > best.1 { (k, w) } else { best });
            assert!(max > 0.0, "filter {} is empty", m);
            assert!(peak >= last_peak, "filter {} peaks below its predecessor", m);
            last_peak = peak;
        }
    }

    #[test]
    fn test_dc_and_nyquist_are_unweighted() {
        let n_freqs = N_FFT / 2 + 1;
        let filters = mel_filter_bank(SAMPLE_RATE, N_FFT, 80);
        for m in 0..80 {
            assert_eq!(filters[m * n_freqs], 0.0);
            assert!(filters[m * n_freqs + n_freqs - 1] < 1e-6);
        }
    }
}
