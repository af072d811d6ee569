//! Whole-buffer resampling of decoded captures
//!
//! Captures arriving at a rate other than the extractor's are converted with
//! rubato's FFT resampler. The filter delay is trimmed so the output lines up
//! with the input and has `ceil(n * to / from)` samples.

use crate::error::{EngineError, Result};
use rubato::{FftFixedIn, Resampler};

const CHUNK_SIZE: usize = 1024;

fn rubato_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::InvalidInput(format!("resampler: {}", e))
}

fn to_i16(s: f32) -> i16 {
    (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn resample_i16(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(EngineError::InvalidInput("sample rate is zero".to_string()));
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
            .map_err(rubato_err)?;

    let expected =
        ((samples.len() as u64 * to_rate as u64 + from_rate as u64 - 1) / from_rate as u64) as usize;
    let delay = resampler.output_delay();

    let input: Vec<f32> = samples
        .iter()
        .map(|&s| s as f32 / i16::MAX as f32)
        .collect();

    let mut output: Vec<f32> = Vec::with_capacity(expected + delay + CHUNK_SIZE);
    let mut pos = 0;

    while input.len() - pos >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk = vec![input[pos..pos + needed].to_vec()];
        let out = resampler.process(&chunk, None).map_err(rubato_err)?;
        output.extend_from_slice(&out[0]);
        pos += needed;
    }

    if pos < input.len() {
        let tail = vec![input[pos..].to_vec()];
        let out = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(rubato_err)?;
        output.extend_from_slice(&out[0]);
    }

    // Flush the filter until the delayed tail has come out
    while output.len() < expected + delay {
        let out = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(rubato_err)?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(to_i16)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn rms(samples: &[i16]) -> f64 {
        let sum: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    #[test]
    fn test_passthrough_same_rate() {
        let samples = vec![1i16, -2, 3, -4];
        assert_eq!(resample_i16(&samples, 16000, 16000).unwrap(), samples);
    }

    #[test]
    fn test_upsample_length_and_level() {
        let input: Vec<i16> = (0..8000)
            .map(|i| ((2.0 * PI * 200.0 * i as f64 / 8000.0).sin() * 10000.0) as i16)
            .collect();

        let output = resample_i16(&input, 8000, 16000).unwrap();
        assert_eq!(output.len(), 16000);

        // Compare the steady-state middle section
        let ratio = rms(&output[2000..14000]) / rms(&input[1000..7000]);
        assert!((0.9..1.1).contains(&ratio), "rms ratio {ratio}");
    }

    #[test]
    fn test_downsample_length() {
        let input = vec![500i16; 44100];
        let output = resample_i16(&input, 44100, 16000).unwrap();
        assert_eq!(output.len(), 16000);
    }
}
