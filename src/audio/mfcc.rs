//! MFCC extraction
//!
//! Frames of `frame_size` samples every `frame_shift` samples are windowed
//! (Hamming), turned into a power spectrum, pooled by triangular Mel filters,
//! log-compressed and decorrelated with an unscaled DCT-II. The per-frame
//! coefficients are averaged into a single utterance-level vector.
//!
//! The filterbank maps Hz to bins with `floor((n_bins + 1) * hz / sample_rate)`
//! and the DCT carries no orthonormal factor. Both match the feature layout of
//! templates already enrolled on devices, so changing either invalidates them.

use super::spectrum::{SpectrumEstimator, TransformKind};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const LOG_FLOOR: f64 = 1e-10;
const PCM_SCALE: f64 = 32768.0;

/// Extractor parameters (`[mfcc]` section of engine.toml)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MfccConfig {
    pub frame_size: usize,
    pub frame_shift: usize,
    pub num_filters: usize,
    pub num_coeffs: usize,
    pub sample_rate: u32,
    pub transform: TransformKind,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            frame_size: 512,
            frame_shift: 256,
            num_filters: 26,
            num_coeffs: 13,
            sample_rate: super::TARGET_SAMPLE_RATE,
            transform: TransformKind::Direct,
        }
    }
}

impl MfccConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_size < 2 || self.frame_shift == 0 {
            return Err(EngineError::InvalidInput(
                "frame_size must be >= 2 and frame_shift > 0".to_string(),
            ));
        }
        if self.num_filters == 0 || self.num_coeffs == 0 || self.num_coeffs > self.num_filters {
            return Err(EngineError::InvalidInput(format!(
                "need 0 < num_coeffs ({}) <= num_filters ({})",
                self.num_coeffs, self.num_filters
            )));
        }
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidInput("sample_rate is zero".to_string()));
        }
        Ok(())
    }
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

fn hamming_window(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Triangular filters between 0 Hz and Nyquist, `[num_filters][n_bins]`
fn mel_filterbank(num_filters: usize, n_bins: usize, sample_rate: u32) -> Vec<Vec<f64>> {
    let sr = sample_rate as f64;
    let mel_low = hz_to_mel(0.0);
    let mel_high = hz_to_mel(sr / 2.0);
    let step = (mel_high - mel_low) / (num_filters + 1) as f64;

    let bins: Vec<usize> = (0..num_filters + 2)
        .map(|i| {
            let hz = mel_to_hz(mel_low + i as f64 * step);
            ((n_bins + 1) as f64 * hz / sr).floor().max(0.0) as usize
        })
        .collect();

    (0..num_filters)
        .map(|m| {
            let (left, center, right) = (bins[m], bins[m + 1], bins[m + 2]);
            let mut filter = vec![0.0; n_bins];

            if center > left {
                for k in left..center.min(n_bins) {
                    filter[k] = (k - left) as f64 / (center - left) as f64;
                }
            }
            if right > center {
                for k in center..right.min(n_bins) {
                    filter[k] = (right - k) as f64 / (right - center) as f64;
                }
            }
            filter
        })
        .collect()
}

/// `[num_coeffs][num_filters]` cosine table
fn dct_table(num_coeffs: usize, num_filters: usize) -> Vec<Vec<f64>> {
    (0..num_coeffs)
        .map(|i| {
            (0..num_filters)
                .map(|j| (PI * i as f64 * (j as f64 + 0.5) / num_filters as f64).cos())
                .collect()
        })
        .collect()
}

/// Reusable extractor; construction precomputes window, filters and DCT
pub struct MfccExtractor {
    config: MfccConfig,
    window: Vec<f64>,
    filterbank: Vec<Vec<f64>>,
    dct: Vec<Vec<f64>>,
    estimator: Box<dyn SpectrumEstimator>,
}

impl MfccExtractor {
    pub fn new(config: MfccConfig) -> Result<Self> {
        config.validate()?;
        let estimator = config.transform.build(config.frame_size)?;
        let n_bins = estimator.num_bins();

        Ok(Self {
            window: hamming_window(config.frame_size),
            filterbank: mel_filterbank(config.num_filters, n_bins, config.sample_rate),
            dct: dct_table(config.num_coeffs, config.num_filters),
            estimator,
            config,
        })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    pub fn num_coeffs(&self) -> usize {
        self.config.num_coeffs
    }

    /// Number of full frames in `n` samples (trailing partial frame dropped)
    pub fn frame_count(&self, n: usize) -> usize {
        if n < self.config.frame_size {
            0
        } else {
            (n - self.config.frame_size) / self.config.frame_shift + 1
        }
    }

    /// Utterance-level coefficient vector, averaged over all frames
    pub fn extract(&self, samples: &[i16]) -> Result<Vec<f64>> {
        let frames = self.frame_count(samples.len());
        if frames == 0 {
            return Err(EngineError::InsufficientAudio {
                needed: self.config.frame_size,
                got: samples.len(),
            });
        }

        let frame_size = self.config.frame_size;
        let mut frame = vec![0.0; frame_size];
        let mut power = vec![0.0; self.estimator.num_bins()];
        let mut log_energy = vec![0.0; self.config.num_filters];
        let mut sum = vec![0.0; self.config.num_coeffs];

        for f in 0..frames {
            let start = f * self.config.frame_shift;
            for (i, slot) in frame.iter_mut().enumerate() {
                *slot = samples[start + i] as f64 / PCM_SCALE * self.window[i];
            }

            self.estimator.power_spectrum(&frame, &mut power);

            for (energy, filter) in log_energy.iter_mut().zip(&self.filterbank) {
                let e: f64 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                *energy = (e + LOG_FLOOR).ln();
            }

            for (acc, basis) in sum.iter_mut().zip(&self.dct) {
                *acc += basis.iter().zip(&log_energy).map(|(c, e)| c * e).sum::<f64>();
            }
        }

        for v in sum.iter_mut() {
            *v /= frames as f64;
        }

        log::debug!(
            "MFCC: {} samples, {} frames, c0={:.3}",
            samples.len(),
            frames,
            sum[0]
        );

        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::cosine_similarity;
    use crate::test_support::sine;
    use proptest::prelude::*;

    #[test]
    fn test_frame_count() {
        let ex = MfccExtractor::new(MfccConfig::default()).unwrap();
        assert_eq!(ex.frame_count(511), 0);
        assert_eq!(ex.frame_count(512), 1);
        assert_eq!(ex.frame_count(767), 1);
        assert_eq!(ex.frame_count(768), 2);
        assert_eq!(ex.frame_count(16000), 61);
    }

    #[test]
    fn test_insufficient_audio() {
        let ex = MfccExtractor::new(MfccConfig::default()).unwrap();
        match ex.extract(&[0i16; 511]).unwrap_err() {
            EngineError::InsufficientAudio { needed, got } => {
                assert_eq!(needed, 512);
                assert_eq!(got, 511);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_silence_c0() {
        let ex = MfccExtractor::new(MfccConfig::default()).unwrap();
        let silence = vec![0i16; 16000];

        let first = ex.extract(&silence).unwrap();
        let second = ex.extract(&silence).unwrap();
        assert_eq!(first, second);

        let expected_c0 = 26.0 * LOG_FLOOR.ln();
        assert!((first[0] - expected_c0).abs() < 1e-6, "c0 = {}", first[0]);
        for c in &first[1..] {
            assert!(c.abs() < 1e-6);
        }
    }

    #[test]
    fn test_trailing_silence_keeps_shape() {
        let ex = MfccExtractor::new(MfccConfig::default()).unwrap();
        let tone = sine(440.0, 0.5, 16000);
        let mut padded = tone.clone();
        padded.extend(std::iter::repeat(0i16).take(800));

        let a = ex.extract(&tone).unwrap();
        let b = ex.extract(&padded).unwrap();
        assert!(cosine_similarity(&a, &b) > 0.99);
    }

    #[test]
    fn test_fft_matches_direct() {
        let direct = MfccExtractor::new(MfccConfig::default()).unwrap();
        let fft = MfccExtractor::new(MfccConfig {
            transform: TransformKind::Fft,
            ..MfccConfig::default()
        })
        .unwrap();

        let tone = sine(300.0, 0.3, 4000);
        let a = direct.extract(&tone).unwrap();
        let b = fft.extract(&tone).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6, "{x} vs {y}");
        }
    }

    #[test]
    fn test_filterbank_shape() {
        let fb = mel_filterbank(26, 257, 16000);
        assert_eq!(fb.len(), 26);
        assert!(fb.iter().all(|f| f.len() == 257));
        // Nyquist maps to bin floor(258 * 0.5) = 129
        assert!(fb.iter().all(|f| f[129..].iter().all(|&w| w == 0.0)));
        assert!(fb.iter().flatten().all(|&w| (0.0..=1.0).contains(&w)));
    }

    #[test]
    fn test_invalid_config() {
        let bad = MfccConfig {
            num_coeffs: 30,
            ..MfccConfig::default()
        };
        assert!(MfccExtractor::new(bad).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn coefficients_are_finite(samples in proptest::collection::vec(any::<i16>(), 512..2048)) {
            let ex = MfccExtractor::new(MfccConfig::default()).unwrap();
            let coeffs = ex.extract(&samples).unwrap();
            prop_assert_eq!(coeffs.len(), 13);
            prop_assert!(coeffs.iter().all(|c| c.is_finite()));
        }
    }
}
