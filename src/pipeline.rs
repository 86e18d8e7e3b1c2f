//! Explicit pipeline context: everything a frame request needs, owned in one place.

use tracing::{debug, info};

use crate::cache::{CacheKey, FrameCache, DEFAULT_CAPACITY};
use crate::convert::{AsciiConverter, AsciiFrame};
use crate::error::{Error, Result, SampleError};
use crate::quality::QualityController;
use crate::sampler::FrameSampler;
use crate::settings::ProcessingSettings;
use crate::source::{MediaSource, PixelBuffer};

/// Source, sampler, cache, converter, quality controller and current settings.
///
/// Operations take `&mut self`; the pipeline is driven from one execution
/// context at a time, which is what keeps the cache single-writer.
pub struct Pipeline<S> {
    source: Option<S>,
    sampler: FrameSampler,
    cache: FrameCache,
    converter: AsciiConverter,
    quality: QualityController,
    settings: ProcessingSettings,
    adaptive: bool,
}

impl<S: MediaSource> Pipeline<S> {
    pub fn new(settings: ProcessingSettings) -> Self {
        Self {
            source: None,
            sampler: FrameSampler::new(settings.device_class),
            cache: FrameCache::new(DEFAULT_CAPACITY),
            converter: AsciiConverter::new(),
            quality: QualityController::new(),
            settings,
            adaptive: true,
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = FrameCache::new(capacity);
        self
    }

    pub fn with_converter(mut self, converter: AsciiConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_sampler(mut self, sampler: FrameSampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Enable or disable latency-driven resolution changes.
    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Attach a source, replacing (and returning) any previous one.
    pub fn attach(&mut self, source: S) -> Option<S> {
        info!(source = %source.identity(), duration = source.duration(), "attaching media source");
        self.cache.clear();
        self.source.replace(source)
    }

    pub fn detach(&mut self) -> Option<S> {
        self.cache.clear();
        self.source.take()
    }

    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }

    pub fn settings(&self) -> &ProcessingSettings {
        &self.settings
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn quality(&self) -> &QualityController {
        &self.quality
    }

    pub fn converter(&self) -> &AsciiConverter {
        &self.converter
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    /// Replace all settings. The latency window is kept.
    pub fn reconfigure(&mut self, settings: ProcessingSettings) {
        if settings.device_class != self.settings.device_class {
            self.sampler = FrameSampler::new(settings.device_class);
        }
        info!(%settings, "reconfigured pipeline");
        self.settings = settings;
    }

    /// Pixel buffer for `time` at the current output size, from cache or the sampler.
    pub async fn sample(&mut self, time: f64) -> Result<PixelBuffer> {
        let (w, h) = (self.settings.output_width, self.settings.output_height);
        let source = self.source.as_ref().ok_or(Error::NoSource)?;
        let duration = source.duration();
        if !(0.0..=duration).contains(&time) {
            return Err(SampleError::InvalidTime { time, duration }.into());
        }

        let key = CacheKey::new(time, w, h);
        if let Some(hit) = self.cache.get(&key) {
            debug!(time, "frame cache hit");
            return Ok(hit);
        }
        let buffer = self.sampler.sample_with_retry(source, key.time().clamp(0.0, duration), w, h).await?;
        self.cache.put(key, buffer.clone());
        Ok(buffer)
    }

    /// Convert a buffer at the current output size.
    pub fn convert(&self, buffer: &PixelBuffer) -> AsciiFrame {
        self.converter.convert(buffer, self.settings.output_width, self.settings.output_height)
    }

    /// ASCII frame for `time`.
    pub async fn frame_at(&mut self, time: f64) -> Result<AsciiFrame> {
        let buffer = self.sample(time).await?;
        Ok(self.convert(&buffer))
    }

    /// Explicit single-frame request; returns the sampled buffer with its frame.
    pub async fn snapshot(&mut self, time: f64) -> Result<(AsciiFrame, PixelBuffer)> {
        let buffer = self.sample(time).await?;
        Ok((self.convert(&buffer), buffer))
    }

    /// Blank frame at the current output size.
    pub fn blank_frame(&self) -> AsciiFrame {
        AsciiFrame::blank(self.settings.output_width, self.settings.output_height)
    }

    /// Feed one frame's processing latency; returns the settings now in effect.
    pub fn observe_latency(&mut self, latency_ms: f64) -> ProcessingSettings {
        let adjusted = self.quality.observe(latency_ms, &self.settings);
        if self.adaptive {
            self.settings = adjusted;
        }
        self.settings
    }

    /// Release the source and clear cache and latency history.
    pub fn reset(&mut self) -> Option<S> {
        self.quality.reset();
        self.detach()
    }
}
