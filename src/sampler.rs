//! Frame sampling: seek a source to a timestamp and read back a letterboxed frame.

use image::{imageops, Rgba, RgbaImage};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SampleError;
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::settings::DeviceClass;
use crate::source::{MediaSource, PixelBuffer, ReadyState};

const POLL_START: Duration = Duration::from_millis(500);
const POLL_MAX: Duration = Duration::from_millis(2000);
const POLL_FACTOR: f64 = 1.1;

const BASE_TIMEOUT_SECS: f64 = 10.0;
const RESOLUTION_TIMEOUT_SECS: f64 = 5.0;
const MAX_TIMEOUT_SECS: f64 = 30.0;
const CONSTRAINED_TIMEOUT_FACTOR: f64 = 1.5;
const CONSTRAINED_MAX_TIMEOUT_SECS: f64 = 45.0;

/// Cursor drift tolerated before the sampler restores the prior position.
pub const RESTORE_THRESHOLD_SECS: f64 = 0.1;

/// Destination rectangle of a letterboxed frame: `(x, y, width, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Fit a `src_w` x `src_h` frame inside `out_w` x `out_h`, centered, preserving aspect ratio.
pub fn fit_rect(src_w: u32, src_h: u32, out_w: u32, out_h: u32) -> FitRect {
    if src_w == 0 || src_h == 0 || out_w == 0 || out_h == 0 {
        return FitRect { x: 0, y: 0, width: out_w, height: out_h };
    }
    let src_aspect = f64::from(src_w) / f64::from(src_h);
    let out_aspect = f64::from(out_w) / f64::from(out_h);

    let (width, height) = if src_aspect > out_aspect {
        let h = (f64::from(out_w) / src_aspect).round() as u32;
        (out_w, h.clamp(1, out_h))
    } else {
        let w = (f64::from(out_h) * src_aspect).round() as u32;
        (w.clamp(1, out_w), out_h)
    };
    FitRect {
        x: (out_w - width) / 2,
        y: (out_h - height) / 2,
        width,
        height,
    }
}

/// Deadline for one seek, scaled by source resolution and device class.
pub fn seek_timeout(device: DeviceClass, natural_size: (u32, u32)) -> Duration {
    let megapixels = f64::from(natural_size.0) * f64::from(natural_size.1) / 1_000_000.0;
    let mut secs = (BASE_TIMEOUT_SECS + megapixels.min(RESOLUTION_TIMEOUT_SECS)).min(MAX_TIMEOUT_SECS);
    if device.is_constrained() {
        secs = (secs * CONSTRAINED_TIMEOUT_FACTOR).min(CONSTRAINED_MAX_TIMEOUT_SECS);
    }
    Duration::from_secs_f64(secs)
}

/// Longest the sampler polls a source that has no current frame.
pub fn readiness_ceiling(device: DeviceClass) -> Duration {
    match device {
        DeviceClass::Standard => Duration::from_secs(10),
        DeviceClass::Constrained => Duration::from_secs(20),
    }
}

#[derive(Debug, Clone)]
pub struct FrameSampler {
    device: DeviceClass,
    policy: RetryPolicy,
}

impl FrameSampler {
    pub fn new(device: DeviceClass) -> Self {
        Self {
            device,
            policy: RetryPolicy::for_device(device),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn device(&self) -> DeviceClass {
        self.device
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Produce one `out_w` x `out_h` frame of `source` at `time`, without retrying.
    pub async fn sample<S: MediaSource>(&self, source: &S, time: f64, out_w: u32, out_h: u32) -> Result<PixelBuffer, SampleError> {
        if !source.is_valid() {
            return Err(SampleError::SourceLost(source.identity()));
        }
        let duration = source.duration();
        if !(0.0..=duration).contains(&time) {
            return Err(SampleError::InvalidTime { time, duration });
        }
        if out_w == 0 || out_h == 0 {
            return Ok(PixelBuffer::new(RgbaImage::new(out_w, out_h)));
        }

        self.wait_until_ready(source).await?;

        let prior = source.current_time();
        let deadline = seek_timeout(self.device, source.natural_size());
        self.seek(source, time, deadline).await?;

        let (src_w, src_h) = source.natural_size();
        let rect = fit_rect(src_w, src_h, out_w, out_h);
        let frame = source.draw(rect.width, rect.height)?;
        let mut surface = RgbaImage::from_pixel(out_w, out_h, Rgba([0, 0, 0, 255]));
        imageops::overlay(&mut surface, &frame, i64::from(rect.x), i64::from(rect.y));

        if (source.current_time() - prior).abs() > RESTORE_THRESHOLD_SECS {
            if let Err(e) = self.seek(source, prior, deadline).await {
                warn!(prior, error = %e, "failed to restore source position");
            }
        }

        Ok(PixelBuffer::new(surface))
    }

    /// [`FrameSampler::sample`] wrapped in the device's retry policy.
    ///
    /// Non-retryable errors return immediately; exhaustion is reported as
    /// [`SampleError::RetriesExhausted`] carrying the timestamp and attempt count.
    pub async fn sample_with_retry<S: MediaSource>(&self, source: &S, time: f64, out_w: u32, out_h: u32) -> Result<PixelBuffer, SampleError> {
        let mut previous: Option<ReadyState> = None;
        let result = retry(&self.policy, |attempt| {
            let now = source.ready_state();
            let stalled = matches!(previous, Some(prev) if now < prev);
            previous = Some(now);
            async move {
                if stalled {
                    warn!(attempt, time, ready = ?now, "source readiness regressed, reloading");
                    source.reload();
                    tokio::time::sleep(self.policy.stall_recovery).await;
                }
                debug!(attempt, time, out_w, out_h, "sampling frame");
                self.sample(source, time, out_w, out_h).await
            }
        })
        .await;

        result.map_err(|e| match e {
            RetryError::Aborted { error, .. } => error,
            RetryError::Exhausted { attempts, last } => SampleError::RetriesExhausted {
                time,
                attempts,
                last: Box::new(last),
            },
        })
    }

    async fn wait_until_ready<S: MediaSource>(&self, source: &S) -> Result<(), SampleError> {
        let ceiling = readiness_ceiling(self.device);
        let mut waited = Duration::ZERO;
        let mut step = POLL_START;

        while source.ready_state() < ReadyState::HaveCurrentData {
            if !source.is_valid() {
                return Err(SampleError::SourceLost(source.identity()));
            }
            if waited >= ceiling {
                if source.ready_state() == ReadyState::HaveNothing {
                    return Err(SampleError::NotReady { waited });
                }
                warn!(?waited, ready = ?source.ready_state(), "source still lacks frame data, continuing");
                break;
            }
            let pause = step.min(ceiling - waited);
            tokio::time::sleep(pause).await;
            waited += pause;
            step = step.mul_f64(POLL_FACTOR).min(POLL_MAX);
        }
        Ok(())
    }

    /// Race the seek against `deadline`; the losing side is dropped.
    async fn seek<S: MediaSource>(&self, source: &S, time: f64, deadline: Duration) -> Result<(), SampleError> {
        match tokio::time::timeout(deadline, source.seek(time)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if !source.is_valid() => Err(SampleError::SourceLost(e.to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SampleError::Timeout { after: deadline }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_wide_source_letterboxes_vertically() {
        // 2:1 into 4:3
        let r = fit_rect(2000, 1000, 120, 90);
        assert_eq!(r, FitRect { x: 0, y: 15, width: 120, height: 60 });
    }

    #[test]
    fn test_fit_tall_source_pillarboxes() {
        let r = fit_rect(1080, 1920, 100, 100);
        assert_eq!(r.height, 100);
        assert_eq!(r.width, 56);
        assert_eq!(r.x, 22);
        assert_eq!(r.y, 0);
    }

    #[test]
    fn test_fit_same_aspect_fills() {
        assert_eq!(fit_rect(640, 480, 80, 60), FitRect { x: 0, y: 0, width: 80, height: 60 });
    }

    #[test]
    fn test_timeout_scaling() {
        assert_eq!(seek_timeout(DeviceClass::Standard, (1000, 1000)), Duration::from_secs(11));
        assert_eq!(seek_timeout(DeviceClass::Standard, (7680, 4320)), Duration::from_secs(15));
        assert_eq!(seek_timeout(DeviceClass::Constrained, (0, 0)), Duration::from_secs(15));
        assert_eq!(seek_timeout(DeviceClass::Constrained, (7680, 4320)), Duration::from_secs_f64(22.5));
    }
}
