//! Adaptive output resolution driven by observed frame latency.

use std::collections::VecDeque;
use tracing::debug;

use crate::settings::{ProcessingSettings, MAX_HEIGHT, MAX_WIDTH, MIN_HEIGHT, MIN_WIDTH};

/// Number of latency samples averaged.
pub const WINDOW: usize = 10;
/// Per-frame target in milliseconds (about 30 FPS).
pub const TARGET_FRAME_MS: f64 = 33.0;

const SHRINK: f64 = 0.8;
const GROW: f64 = 1.1;

#[derive(Debug, Clone, Default)]
pub struct QualityController {
    samples: VecDeque<f64>,
}

impl QualityController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame latency and return adjusted settings.
    ///
    /// Never touches `settings`; the returned value is a copy.
    pub fn observe(&mut self, latency_ms: f64, settings: &ProcessingSettings) -> ProcessingSettings {
        self.samples.push_back(latency_ms);
        while self.samples.len() > WINDOW {
            self.samples.pop_front();
        }
        let mean = self.mean().unwrap_or(latency_ms);

        let (w, h) = (settings.output_width, settings.output_height);
        let (nw, nh) = if mean > TARGET_FRAME_MS * 1.5 {
            (scale(w, SHRINK).max(MIN_WIDTH), scale(h, SHRINK).max(MIN_HEIGHT))
        } else if mean < TARGET_FRAME_MS * 0.5 {
            (scale(w, GROW).min(MAX_WIDTH), scale(h, GROW).min(MAX_HEIGHT))
        } else {
            (w, h)
        };

        if (nw, nh) != (w, h) {
            debug!(mean_ms = mean, from = ?(w, h), to = ?(nw, nh), "adjusting output resolution");
        }
        settings.with_dimensions(nw, nh)
    }

    /// Arithmetic mean of the window, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

fn scale(value: u32, factor: f64) -> u32 {
    (f64::from(value) * factor).floor() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(width: u32, height: u32) -> ProcessingSettings {
        ProcessingSettings::default().with_dimensions(width, height)
    }

    #[test]
    fn test_slow_frames_shrink() {
        let mut qc = QualityController::new();
        let start = at(120, 40);
        let mut s = start;
        for _ in 0..5 {
            s = qc.observe(60.0, &start);
        }
        assert_eq!((s.output_width, s.output_height), (96, 32));
    }

    #[test]
    fn test_fast_frames_grow() {
        let mut qc = QualityController::new();
        let s = qc.observe(5.0, &at(100, 30));
        assert_eq!((s.output_width, s.output_height), (110, 33));
    }

    #[test]
    fn test_target_budget_is_stable() {
        let mut qc = QualityController::new();
        let mut s = at(120, 40);
        for _ in 0..50 {
            s = qc.observe(TARGET_FRAME_MS, &s);
        }
        assert_eq!((s.output_width, s.output_height), (120, 40));
    }

    #[test]
    fn test_bounds_hold_under_extremes() {
        let mut qc = QualityController::new();
        let mut s = at(120, 40);
        for _ in 0..100 {
            s = qc.observe(10_000.0, &s);
            assert!(s.output_width >= MIN_WIDTH && s.output_height >= MIN_HEIGHT);
        }
        assert_eq!((s.output_width, s.output_height), (MIN_WIDTH, MIN_HEIGHT));

        qc.reset();
        for _ in 0..100 {
            s = qc.observe(0.0, &s);
            assert!(s.output_width <= MAX_WIDTH && s.output_height <= MAX_HEIGHT);
        }
        assert_eq!((s.output_width, s.output_height), (MAX_WIDTH, MAX_HEIGHT));
    }

    #[test]
    fn test_window_is_bounded() {
        let mut qc = QualityController::new();
        let s = at(120, 40);
        for i in 0..25 {
            qc.observe(f64::from(i), &s);
        }
        assert_eq!(qc.samples().count(), WINDOW);
        // last ten samples: 15..=24
        assert_eq!(qc.mean(), Some(19.5));
    }

    #[test]
    fn test_caller_settings_untouched() {
        let mut qc = QualityController::new();
        let original = at(120, 40);
        let adjusted = qc.observe(500.0, &original);
        assert_eq!(original.output_width, 120);
        assert_ne!(adjusted, original);
    }
}
