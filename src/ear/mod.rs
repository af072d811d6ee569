//! Ear modality front end
//!
//! Captures arrive as 8-bit grayscale images (binary PGM on disk) and are
//! reduced to a short discriminant vector by [`EarProjection`].

pub mod projection;

use crate::error::{EngineError, Result};

pub use projection::EarProjection;

/// 8-bit grayscale image, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        let needed = pixel_count(width, height)?;
        if pixels.len() != needed {
            return Err(EngineError::TruncatedData {
                declared: needed,
                available: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decode a binary PGM (`P5`, maxval <= 255)
    pub fn from_pgm(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 || &bytes[0..2] != b"P5" {
            return Err(EngineError::Format("missing P5 magic".to_string()));
        }

        let mut pos = 2;
        let mut header = [0usize; 3];
        for field in header.iter_mut() {
            *field = next_header_number(bytes, &mut pos)?;
        }
        let [width, height, maxval] = header;

        if maxval == 0 || maxval > 255 {
            return Err(EngineError::UnsupportedEncoding(format!(
                "PGM maxval {} (only 8-bit images are supported)",
                maxval
            )));
        }

        // Exactly one whitespace byte separates the header from the raster
        pos += 1;
        let raster = bytes.get(pos..).unwrap_or(&[]);
        let needed = pixel_count(width, height)?;
        if raster.len() < needed {
            return Err(EngineError::TruncatedData {
                declared: needed,
                available: raster.len(),
            });
        }

        let pixels = if maxval == 255 {
            raster[..needed].to_vec()
        } else {
            raster[..needed]
                .iter()
                .map(|&p| ((p as usize).min(maxval) * 255 / maxval) as u8)
                .collect()
        };

        Self::new(width, height, pixels)
    }

    /// Pixels scaled to [0, 1]
    pub fn to_unit(&self) -> Vec<f64> {
        self.pixels.iter().map(|&p| p as f64 / 255.0).collect()
    }
}

fn pixel_count(width: usize, height: usize) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(EngineError::Format("image has zero size".to_string()));
    }
    width.checked_mul(height).ok_or_else(|| {
        EngineError::Format(format!("image size {}x{} overflows", width, height))
    })
}

fn next_header_number(bytes: &[u8], pos: &mut usize) -> Result<usize> {
    loop {
        match bytes.get(*pos) {
            Some(b'#') => {
                while let Some(&b) = bytes.get(*pos) {
                    *pos += 1;
                    if b == b'\n' {
                        break;
                    }
                }
            }
            Some(b) if b.is_ascii_whitespace() => *pos += 1,
            Some(_) => break,
            None => return Err(EngineError::Format("PGM header cut short".to_string())),
        }
    }

    let start = *pos;
    while bytes.get(*pos).is_some_and(|b| b.is_ascii_digit()) {
        *pos += 1;
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::Format("PGM header field is not a number".to_string()))
}
