//! RIFF/WAVE container decoding
//!
//! Only single-channel 16-bit linear PCM is accepted. Unknown chunks are
//! skipped; the `data` chunk must be fully present.

use super::{TARGET_BITS_PER_SAMPLE, TARGET_CHANNELS};
use crate::error::{EngineError, Result};

const WAVE_FORMAT_PCM: u16 = 1;
const CHUNK_HEADER_LEN: usize = 8;
const FMT_MIN_LEN: usize = 16;

/// Decoded PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl Waveform {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

struct FmtChunk {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode a WAV byte buffer into PCM samples
pub fn decode_wav(bytes: &[u8]) -> Result<Waveform> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(EngineError::Format(
            "missing RIFF/WAVE magic".to_string(),
        ));
    }

    let mut fmt: Option<FmtChunk> = None;
    let mut pos = 12;

    while pos + CHUNK_HEADER_LEN <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32(bytes, pos + 4) as usize;
        let body = pos + CHUNK_HEADER_LEN;
        let available = bytes.len() - body;

        match id {
            b"fmt " => {
                if size < FMT_MIN_LEN || available < FMT_MIN_LEN {
                    return Err(EngineError::Format("fmt chunk too short".to_string()));
                }
                fmt = Some(FmtChunk {
                    format_tag: read_u16(bytes, body),
                    channels: read_u16(bytes, body + 2),
                    sample_rate: read_u32(bytes, body + 4),
                    bits_per_sample: read_u16(bytes, body + 14),
                });
            }
            b"data" => {
                let fmt = fmt
                    .as_ref()
                    .ok_or_else(|| EngineError::Format("data chunk before fmt".to_string()))?;
                check_encoding(fmt)?;

                if size > available {
                    return Err(EngineError::TruncatedData {
                        declared: size,
                        available,
                    });
                }

                let samples = bytes[body..body + size]
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                    .collect::<Vec<_>>();

                log::debug!(
                    "WAV decoded: {} samples, {} Hz, {} bits",
                    samples.len(),
                    fmt.sample_rate,
                    fmt.bits_per_sample
                );

                return Ok(Waveform {
                    samples,
                    sample_rate: fmt.sample_rate,
                    bits_per_sample: fmt.bits_per_sample,
                });
            }
            _ => {}
        }

        // RIFF chunks are padded to an even length
        pos = body.saturating_add(size).saturating_add(size & 1);
    }

    if fmt.is_none() {
        Err(EngineError::Format("missing fmt chunk".to_string()))
    } else {
        Err(EngineError::Format("missing data chunk".to_string()))
    }
}

fn check_encoding(fmt: &FmtChunk) -> Result<()> {
    if fmt.format_tag != WAVE_FORMAT_PCM {
        return Err(EngineError::UnsupportedEncoding(format!(
            "format tag {} is not linear PCM",
            fmt.format_tag
        )));
    }
    if fmt.channels != TARGET_CHANNELS {
        return Err(EngineError::UnsupportedEncoding(format!(
            "{} channels, only mono is supported",
            fmt.channels
        )));
    }
    if fmt.bits_per_sample != TARGET_BITS_PER_SAMPLE {
        return Err(EngineError::UnsupportedEncoding(format!(
            "{} bits per sample, only 16 is supported",
            fmt.bits_per_sample
        )));
    }
    if fmt.sample_rate == 0 {
        return Err(EngineError::Format("sample rate is zero".to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Render samples into an in-memory WAV using hound
    pub(crate) fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16, bits: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                if bits == 8 {
                    writer.write_sample((s >> 8) as i8).unwrap();
                } else {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_roundtrip() {
        let samples: Vec<i16> = (0..1000).map(|i| (i * 7 % 2000 - 1000) as i16).collect();
        let bytes = wav_bytes(&samples, 16000, 1, 16);

        let wave = decode_wav(&bytes).unwrap();
        assert_eq!(wave.samples, samples);
        assert_eq!(wave.sample_rate, 16000);
        assert_eq!(wave.bits_per_sample, 16);
    }

    #[test]
    fn test_missing_magic() {
        let err = decode_wav(b"not a wav file at all").unwrap_err();
        assert!(matches!(err, EngineError::Format(_)));

        let err = decode_wav(&[]).unwrap_err();
        assert!(matches!(err, EngineError::Format(_)));
    }

    #[test]
    fn test_stereo_rejected() {
        let bytes = wav_bytes(&[0, 0, 1, 1], 16000, 2, 16);
        let err = decode_wav(&bytes).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedEncoding(_)));
    }

    #[test]
    fn test_eight_bit_rejected() {
        let bytes = wav_bytes(&[0, 256, 512], 16000, 1, 8);
        let err = decode_wav(&bytes).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedEncoding(_)));
    }

    #[test]
    fn test_truncated_data() {
        let mut bytes = wav_bytes(&vec![100i16; 400], 16000, 1, 16);
        bytes.truncate(bytes.len() - 100);

        match decode_wav(&bytes).unwrap_err() {
            EngineError::TruncatedData {
                declared,
                available,
            } => {
                assert_eq!(declared, 800);
                assert_eq!(available, 700);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_skips_unknown_chunks() {
        let base = wav_bytes(&[1, 2, 3, 4], 8000, 1, 16);

        // Insert an odd-sized LIST chunk (with pad byte) between fmt and data
        let mut bytes = base[..36].to_vec();
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[b'a', b'b', b'c', 0]);
        bytes.extend_from_slice(&base[36..]);

        let wave = decode_wav(&bytes).unwrap();
        assert_eq!(wave.samples, vec![1, 2, 3, 4]);
        assert_eq!(wave.sample_rate, 8000);
    }

    #[test]
    fn test_missing_data_chunk() {
        let base = wav_bytes(&[1, 2], 16000, 1, 16);
        let err = decode_wav(&base[..36]).unwrap_err();
        assert!(matches!(err, EngineError::Format(_)));
    }

    #[test]
    fn test_duration() {
        let wave = Waveform {
            samples: vec![0; 8000],
            sample_rate: 16000,
            bits_per_sample: 16,
        };
        assert_eq!(wave.duration_ms(), 500);
    }
}
