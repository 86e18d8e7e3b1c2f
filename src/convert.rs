//! Pixel buffer to character grid conversion.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::source::PixelBuffer;

/// Default glyph ramp, darkest to lightest.
pub const DEFAULT_RAMP: &str = " .:-=+*#%@";

/// A grid of equal-length text lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct AsciiFrame {
    lines: Vec<String>,
}

impl AsciiFrame {
    /// Build a frame from rows. Every row must have the same length.
    pub fn from_lines(lines: Vec<String>) -> Self {
        debug_assert!(lines.windows(2).all(|w| w[0].len() == w[1].len()));
        Self { lines }
    }

    /// A frame of spaces.
    pub fn blank(width: u32, height: u32) -> Self {
        let row = " ".repeat(width as usize);
        Self { lines: vec![row; height as usize] }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Width in characters (0 for an empty frame).
    pub fn width(&self) -> usize {
        self.lines.first().map(|l| l.len()).unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Rows joined with `\n`, no trailing newline.
    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }

    /// Approximate in-memory size in bytes.
    pub fn byte_len(&self) -> usize {
        self.lines.iter().map(|l| l.len() + 1).sum()
    }
}

impl fmt::Display for AsciiFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Local-contrast boost applied to block luminance before glyph mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastEnhance {
    pub gain: f64,
    pub lift: f64,
    pub secondary_gain: f64,
    pub contrast_threshold: f64,
}

impl Default for ContrastEnhance {
    fn default() -> Self {
        Self {
            gain: 1.3,
            lift: 5.0,
            secondary_gain: 1.1,
            contrast_threshold: 0.3,
        }
    }
}

impl ContrastEnhance {
    /// Neighborhood radius in cells for a given source block size.
    pub fn radius_for_block(block_w: u32, block_h: u32) -> usize {
        if block_w.min(block_h) <= 4 {
            1
        } else {
            2
        }
    }

    /// Enhance a `cols` x `rows` luminance grid in place.
    pub fn apply(&self, gray: &mut [u8], cols: usize, rows: usize, radius: usize) {
        if cols == 0 || rows == 0 {
            return;
        }
        let src = gray.to_vec();
        for y in 0..rows {
            let y0 = y.saturating_sub(radius);
            let y1 = (y + radius).min(rows - 1);
            for x in 0..cols {
                let x0 = x.saturating_sub(radius);
                let x1 = (x + radius).min(cols - 1);

                let mut sum = 0u32;
                let mut count = 0u32;
                let mut lo = u8::MAX;
                let mut hi = u8::MIN;
                for ny in y0..=y1 {
                    for nx in x0..=x1 {
                        let v = src[ny * cols + nx];
                        sum += u32::from(v);
                        count += 1;
                        lo = lo.min(v);
                        hi = hi.max(v);
                    }
                }
                let local_avg = f64::from(sum) / f64::from(count);
                let local_contrast = f64::from(hi - lo) / 255.0;
                let value = f64::from(src[y * cols + x]);

                let mut enhanced = (value - local_avg) * self.gain + local_avg + self.lift;
                if local_contrast > self.contrast_threshold {
                    enhanced = (enhanced - 128.0) * self.secondary_gain + 128.0;
                }
                gray[y * cols + x] = enhanced.clamp(0.0, 255.0).round() as u8;
            }
        }
    }
}

/// Block-averaging converter from pixel buffers to ASCII frames.
#[derive(Debug, Clone)]
pub struct AsciiConverter {
    ramp: Vec<u8>,
    contrast: Option<ContrastEnhance>,
}

impl Default for AsciiConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl AsciiConverter {
    /// Converter with the default ramp and no contrast enhancement.
    pub fn new() -> Self {
        Self {
            ramp: DEFAULT_RAMP.as_bytes().to_vec(),
            contrast: None,
        }
    }

    /// Use a custom ramp. Non-ASCII or empty ramps fall back to the default.
    pub fn with_ramp(mut self, ramp: &str) -> Self {
        if !ramp.is_empty() && ramp.is_ascii() {
            self.ramp = ramp.as_bytes().to_vec();
        }
        self
    }

    pub fn with_contrast(mut self, contrast: Option<ContrastEnhance>) -> Self {
        self.contrast = contrast;
        self
    }

    pub fn ramp(&self) -> &[u8] {
        &self.ramp
    }

    /// Convert `buffer` into a grid of at most `out_w` x `out_h` characters.
    ///
    /// Trailing partial blocks are dropped. Zero-sized input or output yields an empty frame.
    pub fn convert(&self, buffer: &PixelBuffer, out_w: u32, out_h: u32) -> AsciiFrame {
        let (src_w, src_h) = (buffer.width(), buffer.height());
        if src_w == 0 || src_h == 0 || out_w == 0 || out_h == 0 {
            return AsciiFrame::default();
        }

        let block_w = (src_w / out_w).max(1);
        let block_h = (src_h / out_h).max(1);
        let cols = (src_w / block_w).min(out_w) as usize;
        let rows = (src_h / block_h).min(out_h) as usize;

        let data = buffer.as_bytes();
        let stride = src_w as usize * 4;
        let mut gray = Vec::with_capacity(cols * rows);
        for by in 0..rows {
            for bx in 0..cols {
                let x0 = bx * block_w as usize;
                let y0 = by * block_h as usize;
                let mut sum = [0u64; 3];
                for y in y0..y0 + block_h as usize {
                    let row = &data[y * stride..(y + 1) * stride];
                    for px in row[x0 * 4..(x0 + block_w as usize) * 4].chunks_exact(4) {
                        sum[0] += u64::from(px[0]);
                        sum[1] += u64::from(px[1]);
                        sum[2] += u64::from(px[2]);
                    }
                }
                let n = f64::from(block_w * block_h);
                gray.push(luminance(sum[0] as f64 / n, sum[1] as f64 / n, sum[2] as f64 / n));
            }
        }

        if let Some(contrast) = &self.contrast {
            let radius = ContrastEnhance::radius_for_block(block_w, block_h);
            contrast.apply(&mut gray, cols, rows, radius);
        }

        let lines = gray
            .chunks_exact(cols)
            .map(|row| row.iter().map(|&l| char_for(l, &self.ramp)).collect::<String>())
            .collect();
        AsciiFrame::from_lines(lines)
    }
}

/// Rec. 601 luma of mean channel values, rounded to the nearest integer.
fn luminance(r: f64, g: f64, b: f64) -> u8 {
    (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8
}

fn char_for(luma: u8, ramp: &[u8]) -> char {
    let last = ramp.len().saturating_sub(1);
    let idx = (usize::from(luma) * last / 255).min(last);
    ramp[idx] as char
}
