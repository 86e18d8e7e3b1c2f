//! # reelscii - Video to ASCII Playback Library
//!
//! `reelscii` turns a playing video into a stream of ASCII frames, either on
//! demand while the video plays or ahead of time as a pre-rendered sequence.
//!
//! ## Features
//!
//! - Seek-and-sample frame extraction with adaptive timeouts and retries
//! - Small FIFO cache of sampled frames keyed by time and resolution
//! - Block-averaged luminance to ASCII conversion with optional contrast boost
//! - Latency-driven output resolution control
//! - Live and precomputed playback with audio sync and recording
//!
//! ## Example
//!
//! ```no_run
//! use reelscii::{DeviceClass, FfmpegConfig, FfmpegSource, Pipeline, ProcessingSettings, QualityTier};
//! use std::path::Path;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let source = FfmpegSource::open(Path::new("video.mp4"), FfmpegConfig::default()).await?;
//! let mut pipeline = Pipeline::new(ProcessingSettings::from_tier(QualityTier::Medium, DeviceClass::Standard));
//! pipeline.attach(source);
//!
//! let frame = pipeline.frame_at(1.5).await?;
//! println!("{}", frame);
//! # Ok(())
//! # }
//! ```
//!
//! ## Progress Reporting
//!
//! Precomputing a whole video reports progress per phase:
//!
//! ```no_run
//! use reelscii::{precompute, FfmpegSource, Pipeline, ProgressPhase};
//!
//! # async fn demo(mut pipeline: Pipeline<FfmpegSource>) -> reelscii::Result<()> {
//! let frames = precompute(&mut pipeline, |progress| match progress.phase {
//!     ProgressPhase::SamplingFrames => println!("Sampling {}/{}", progress.completed, progress.total),
//!     ProgressPhase::ConvertingFrames => println!("Converting: {:.1}%", progress.percentage),
//!     ProgressPhase::Complete => println!("Done!"),
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod ffmpeg;
pub mod pipeline;
pub mod playback;
pub mod precompute;
pub mod quality;
pub mod record;
pub mod retry;
pub mod sampler;
pub mod settings;
pub mod source;
pub mod store;

pub use cache::{CacheKey, FrameCache};
pub use config::{load_config, AppConfig};
pub use convert::{AsciiConverter, AsciiFrame, ContrastEnhance, DEFAULT_RAMP};
pub use error::{Error, Result, SampleError};
pub use ffmpeg::{FfmpegConfig, FfmpegSource, FfplayAudio};
pub use pipeline::Pipeline;
pub use playback::{AudioSink, Command, FrameSink, NullAudio, PlaybackDriver, PlaybackInfo, PlaybackMode, PlaybackState, Recorder};
pub use precompute::{precompute, Progress, ProgressPhase};
pub use quality::QualityController;
pub use record::DirectoryRecorder;
pub use retry::{retry, RetryError, RetryPolicy};
pub use sampler::{fit_rect, FitRect, FrameSampler};
pub use settings::{DeviceClass, ProcessingSettings, QualityTier};
pub use source::{MediaSource, PixelBuffer, ReadyState};
pub use store::{FrameStore, StoredSequence};
