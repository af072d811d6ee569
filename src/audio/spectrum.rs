//! Power spectrum estimation for windowed frames
//!
//! Both estimators produce `frame_size / 2 + 1` bins, each scaled by
//! `1 / frame_size`, so they are interchangeable inside the extractor.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Which transform the extractor uses for its power spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    /// O(n²) direct DFT over the first half of the spectrum
    #[default]
    Direct,
    /// Iterative radix-2 Cooley-Tukey; frame size must be a power of two
    Fft,
}

impl TransformKind {
    pub fn build(self, frame_size: usize) -> Result<Box<dyn SpectrumEstimator>> {
        Ok(match self {
            TransformKind::Direct => Box::new(DirectDft::new(frame_size)?),
            TransformKind::Fft => Box::new(RadixTwoFft::new(frame_size)?),
        })
    }
}

pub trait SpectrumEstimator: Send + Sync {
    fn frame_size(&self) -> usize;

    fn num_bins(&self) -> usize {
        self.frame_size() / 2 + 1
    }

    /// Write the scaled power spectrum of `frame` into `out` (`num_bins` long)
    fn power_spectrum(&self, frame: &[f64], out: &mut [f64]);
}

/// Direct DFT with a precomputed twiddle table
pub struct DirectDft {
    frame_size: usize,
    cos_table: Vec<f64>,
    sin_table: Vec<f64>,
}

impl DirectDft {
    pub fn new(frame_size: usize) -> Result<Self> {
        if frame_size < 2 {
            return Err(EngineError::InvalidInput(format!(
                "frame size {} is too small",
                frame_size
            )));
        }

        // Index k·n mod N covers every twiddle the transform needs
        let (cos_table, sin_table) = (0..frame_size)
            .map(|i| {
                let angle = -2.0 * PI * i as f64 / frame_size as f64;
                (angle.cos(), angle.sin())
            })
            .unzip();

        Ok(Self {
            frame_size,
            cos_table,
            sin_table,
        })
    }
}

impl SpectrumEstimator for DirectDft {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn power_spectrum(&self, frame: &[f64], out: &mut [f64]) {
        let n = self.frame_size;
        for (k, bin) in out.iter_mut().enumerate().take(self.num_bins()) {
            let mut re = 0.0;
            let mut im = 0.0;
            for (i, &x) in frame.iter().enumerate().take(n) {
                let idx = (k * i) % n;
                re += x * self.cos_table[idx];
                im += x * self.sin_table[idx];
            }
            *bin = (re * re + im * im) / n as f64;
        }
    }
}

/// In-place radix-2 FFT over `(re, im)` pairs
pub struct RadixTwoFft {
    frame_size: usize,
}

impl RadixTwoFft {
    pub fn new(frame_size: usize) -> Result<Self> {
        if frame_size < 2 || !frame_size.is_power_of_two() {
            return Err(EngineError::InvalidInput(format!(
                "radix-2 transform needs a power-of-two frame size, got {}",
                frame_size
            )));
        }
        Ok(Self { frame_size })
    }

    fn transform(x: &mut [(f64, f64)]) {
        let n = x.len();

        let mut j = 0usize;
        for i in 1..n {
            let mut bit = n >> 1;
            while j & bit != 0 {
                j ^= bit;
                bit >>= 1;
            }
            j ^= bit;
            if i < j {
                x.swap(i, j);
            }
        }

        let mut size = 2;
        while size <= n {
            let half = size / 2;
            let angle = -2.0 * PI / size as f64;
            for start in (0..n).step_by(size) {
                for k in 0..half {
                    let (w_re, w_im) = ((angle * k as f64).cos(), (angle * k as f64).sin());
                    let (b_re, b_im) = x[start + k + half];
                    let t_re = w_re * b_re - w_im * b_im;
                    let t_im = w_re * b_im + w_im * b_re;
                    let (u_re, u_im) = x[start + k];
                    x[start + k] = (u_re + t_re, u_im + t_im);
                    x[start + k + half] = (u_re - t_re, u_im - t_im);
                }
            }
            size <<= 1;
        }
    }
}

impl SpectrumEstimator for RadixTwoFft {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn power_spectrum(&self, frame: &[f64], out: &mut [f64]) {
        let n = self.frame_size;
        let mut buf: Vec<(f64, f64)> = frame.iter().take(n).map(|&v| (v, 0.0)).collect();
        buf.resize(n, (0.0, 0.0));
        Self::transform(&mut buf);

        for (bin, &(re, im)) in out.iter_mut().zip(buf.iter()).take(self.num_bins()) {
            *bin = (re * re + im * im) / n as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64 / 16000.0;
                0.6 * (2.0 * PI * 440.0 * t).sin() + 0.2 * (2.0 * PI * 3100.0 * t).cos()
                    + 0.01 * ((i * 7919) % 13) as f64
            })
            .collect()
    }

    #[test]
    fn test_direct_and_fft_agree() {
        let frame = test_frame(512);
        let direct = DirectDft::new(512).unwrap();
        let fft = RadixTwoFft::new(512).unwrap();

        let mut a = vec![0.0; direct.num_bins()];
        let mut b = vec![0.0; fft.num_bins()];
        direct.power_spectrum(&frame, &mut a);
        fft.power_spectrum(&frame, &mut b);

        assert_eq!(a.len(), 257);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() <= 1e-9 * x.abs().max(1.0), "{x} vs {y}");
        }
    }

    #[test]
    fn test_dc_bin_scaling() {
        // Constant frame: |X[0]|² = (N·c)², scaled by 1/N gives N·c²
        let frame = vec![0.5; 8];
        let direct = DirectDft::new(8).unwrap();
        let mut out = vec![0.0; 5];
        direct.power_spectrum(&frame, &mut out);
        assert!((out[0] - 2.0).abs() < 1e-12);
        assert!(out[1..].iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_fft_requires_power_of_two() {
        assert!(RadixTwoFft::new(400).is_err());
        assert!(TransformKind::Fft.build(400).is_err());
        assert!(TransformKind::Direct.build(400).is_ok());
    }
}
