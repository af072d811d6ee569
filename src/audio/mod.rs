//! Audio front end for the voice modality
//!
//! WAV container decoding, optional resampling to the processing rate, and
//! MFCC feature extraction.

pub mod mfcc;
pub mod resample;
pub mod spectrum;
pub mod wav;

use crate::error::Result;
use serde::{Deserialize, Serialize};

pub use mfcc::{MfccConfig, MfccExtractor};
pub use spectrum::{DirectDft, RadixTwoFft, SpectrumEstimator, TransformKind};
pub use wav::{decode_wav, Waveform};

/// Target sample rate for all audio processing (16 kHz)
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Target number of channels for processing (always mono)
pub const TARGET_CHANNELS: u16 = 1;

/// Bit depth accepted by the decoder
pub const TARGET_BITS_PER_SAMPLE: u16 = 16;

/// Summary of a decoded capture, reported back in enrollment results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub sample_rate: u32,
    pub samples: usize,
    pub duration_ms: u64,
    pub resampled: bool,
}

/// Decode a WAV capture and bring it to the extractor's sample rate
pub fn prepare_capture(bytes: &[u8], target_rate: u32) -> Result<(Vec<i16>, CaptureInfo)> {
    let waveform = wav::decode_wav(bytes)?;
    let source_rate = waveform.sample_rate;
    let duration_ms = waveform.duration_ms();

    let (samples, resampled) = if source_rate != target_rate {
        log::info!(
            "Audio: capture={}Hz -> processing={}Hz (resampling)",
            source_rate,
            target_rate
        );
        (
            resample::resample_i16(&waveform.samples, source_rate, target_rate)?,
            true,
        )
    } else {
        (waveform.samples, false)
    };

    let info = CaptureInfo {
        sample_rate: source_rate,
        samples: samples.len(),
        duration_ms,
        resampled,
    };
    Ok((samples, info))
}
