//! Pre-render a whole source into an ordered frame list.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::convert::AsciiFrame;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::source::{MediaSource, PixelBuffer};

/// Represents the current phase of a precompute run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Seeking the source and reading back frames
    SamplingFrames,
    /// Converting sampled frames to ASCII
    ConvertingFrames,
    /// All frames are ready
    Complete,
}

/// Progress information for precompute runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub phase: ProgressPhase,
    /// Number of items completed in the current phase
    pub completed: usize,
    /// Total number of items in the current phase
    pub total: usize,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    pub message: String,
}

impl Progress {
    fn new(phase: ProgressPhase, completed: usize, total: usize, message: String) -> Self {
        let percentage = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self { phase, completed, total, percentage, message }
    }

    pub fn sampling_frames(completed: usize, total: usize) -> Self {
        Self::new(ProgressPhase::SamplingFrames, completed, total, format!("Sampling frame {} of {}", completed, total))
    }

    pub fn converting_frames(completed: usize, total: usize) -> Self {
        Self::new(ProgressPhase::ConvertingFrames, completed, total, format!("Converting frame {} of {}", completed, total))
    }

    pub fn complete(total_frames: usize) -> Self {
        Self::new(ProgressPhase::Complete, total_frames, total_frames, format!("Precompute complete: {} frames", total_frames))
    }
}

/// Timestamps of every frame at `fps` over `duration` seconds.
pub fn frame_times(duration: f64, fps: u32) -> Vec<f64> {
    let fps = f64::from(fps.max(1));
    let count = (duration.max(0.0) * fps).floor() as usize;
    (0..count).map(|i| i as f64 / fps).collect()
}

/// Frames sampled before each parallel conversion pass. Bounds how many
/// pixel buffers a run holds at once.
pub const CHUNK_FRAMES: usize = 64;

/// Render every frame of the attached source at the pipeline's current settings.
///
/// Frames are sampled sequentially through the pipeline in chunks of
/// [`CHUNK_FRAMES`]; each chunk is converted in parallel and its buffers
/// dropped before the next one is sampled. Frames that fail to sample become
/// blank frames; a lost source aborts the run.
pub async fn precompute<S, F>(pipeline: &mut Pipeline<S>, progress: F) -> Result<Vec<AsciiFrame>>
where
    S: MediaSource,
    F: Fn(Progress) + Send + Sync,
{
    let duration = pipeline.source().map(|s| s.duration()).ok_or(Error::NoSource)?;
    let settings = *pipeline.settings();
    let times = frame_times(duration, settings.frame_rate);
    let total = times.len();
    info!(frames = total, %settings, "precomputing sequence");

    let converter = pipeline.converter().clone();
    let (w, h) = (settings.output_width, settings.output_height);
    let converted = AtomicUsize::new(0);
    let mut frames: Vec<AsciiFrame> = Vec::with_capacity(total);
    let mut buffers: Vec<Option<PixelBuffer>> = Vec::with_capacity(CHUNK_FRAMES.min(total));

    progress(Progress::sampling_frames(0, total));
    for (index, chunk) in times.chunks(CHUNK_FRAMES).enumerate() {
        let sampled = index * CHUNK_FRAMES;
        for (i, &time) in chunk.iter().enumerate() {
            if let Some(source) = pipeline.source() {
                source.set_current_time(time);
            }
            match pipeline.sample(time).await {
                Ok(buffer) => buffers.push(Some(buffer)),
                Err(Error::Sample(e)) if e.is_terminal() => return Err(Error::Sample(e)),
                Err(e) => {
                    warn!(time, error = %e, "frame unavailable, using blank frame");
                    buffers.push(None);
                }
            }
            progress(Progress::sampling_frames(sampled + i + 1, total));
        }

        let batch: Vec<AsciiFrame> = buffers
            .par_drain(..)
            .map(|buffer| {
                let frame = match buffer {
                    Some(buffer) => converter.convert(&buffer, w, h),
                    None => AsciiFrame::blank(w, h),
                };
                let current = converted.fetch_add(1, Ordering::SeqCst) + 1;
                progress(Progress::converting_frames(current, total));
                frame
            })
            .collect();
        debug!(chunk = index, frames = batch.len(), "converted chunk");
        frames.extend(batch);
    }

    progress(Progress::complete(frames.len()));
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_times() {
        let times = frame_times(0.35, 10);
        assert_eq!(times.len(), 3);
        assert_eq!(times[2], 0.2);
        assert!(frame_times(0.0, 30).is_empty());
    }

    #[test]
    fn test_progress_percentage() {
        let p = Progress::converting_frames(25, 100);
        assert_eq!(p.percentage, 25.0);
        assert_eq!(Progress::sampling_frames(0, 0).percentage, 0.0);
        assert_eq!(Progress::complete(7).phase, ProgressPhase::Complete);
    }
}
