#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use reelscii::{AsciiFrame, AudioSink, FrameSink, MediaSource, ProcessingSettings, ReadyState, Recorder, SampleError};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

/// What the next seek does instead of succeeding.
#[derive(Debug, Clone)]
pub enum SeekFault {
    Fail(SampleError),
    /// Fail and drop readiness to the given state.
    FailAndStall(SampleError, ReadyState),
    /// Invalidate the handle mid-seek.
    Lose,
}

/// In-memory source whose frames are solid gray, brighter later in the clip.
pub struct ScriptedSource {
    pub duration: f64,
    pub size: (u32, u32),
    ready: Cell<ReadyState>,
    valid: Cell<bool>,
    position: Cell<f64>,
    seek_delay: Cell<Duration>,
    fail_every_seek: Cell<bool>,
    faults: RefCell<VecDeque<SeekFault>>,
    seeks: RefCell<Vec<f64>>,
    reloads: Cell<u32>,
}

impl ScriptedSource {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            size: (320, 160),
            ready: Cell::new(ReadyState::HaveEnoughData),
            valid: Cell::new(true),
            position: Cell::new(0.0),
            seek_delay: Cell::new(Duration::ZERO),
            fail_every_seek: Cell::new(false),
            faults: RefCell::new(VecDeque::new()),
            seeks: RefCell::new(Vec::new()),
            reloads: Cell::new(0),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    pub fn with_ready(self, ready: ReadyState) -> Self {
        self.ready.set(ready);
        self
    }

    pub fn with_seek_delay(self, delay: Duration) -> Self {
        self.seek_delay.set(delay);
        self
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.set(valid);
    }

    pub fn set_ready(&self, ready: ReadyState) {
        self.ready.set(ready);
    }

    pub fn set_position(&self, time: f64) {
        self.position.set(time);
    }

    pub fn fail_every_seek(&self, fail: bool) {
        self.fail_every_seek.set(fail);
    }

    pub fn push_fault(&self, fault: SeekFault) {
        self.faults.borrow_mut().push_back(fault);
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.seeks.borrow().clone()
    }

    pub fn reloads(&self) -> u32 {
        self.reloads.get()
    }

    /// Gray level drawn for a cursor at `time`.
    pub fn level_at(&self, time: f64) -> u8 {
        ((time / self.duration).clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

impl MediaSource for ScriptedSource {
    fn identity(&self) -> String {
        "scripted".to_string()
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn natural_size(&self) -> (u32, u32) {
        self.size
    }

    fn ready_state(&self) -> ReadyState {
        self.ready.get()
    }

    fn is_valid(&self) -> bool {
        self.valid.get()
    }

    fn current_time(&self) -> f64 {
        self.position.get()
    }

    fn set_current_time(&self, time: f64) {
        self.position.set(time);
    }

    async fn seek(&self, time: f64) -> Result<(), SampleError> {
        self.seeks.borrow_mut().push(time);
        if !self.valid.get() {
            return Err(SampleError::SourceLost("scripted".to_string()));
        }
        let fault = self.faults.borrow_mut().pop_front();
        match fault {
            Some(SeekFault::Fail(e)) => return Err(e),
            Some(SeekFault::FailAndStall(e, ready)) => {
                self.ready.set(ready);
                return Err(e);
            }
            Some(SeekFault::Lose) => {
                self.valid.set(false);
                return Err(SampleError::Decode("handle closed".to_string()));
            }
            None => {}
        }
        if self.fail_every_seek.get() {
            return Err(SampleError::Decode("scripted failure".to_string()));
        }
        let delay = self.seek_delay.get();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.position.set(time);
        Ok(())
    }

    fn draw(&self, width: u32, height: u32) -> Result<RgbaImage, SampleError> {
        let level = self.level_at(self.position.get());
        Ok(RgbaImage::from_pixel(width, height, Rgba([level, level, level, 255])))
    }

    fn reload(&self) {
        self.reloads.set(self.reloads.get() + 1);
    }
}

/// Settings with a tiny fixed grid, bypassing the normal clamp.
pub fn tiny_settings(width: u32, height: u32, fps: u32) -> ProcessingSettings {
    ProcessingSettings {
        output_width: width,
        output_height: height,
        frame_rate: fps,
        ..ProcessingSettings::default()
    }
}

#[derive(Clone, Default)]
pub struct Screen {
    pub shown: Rc<RefCell<Vec<AsciiFrame>>>,
    pub clears: Rc<Cell<u32>>,
}

impl FrameSink for Screen {
    fn show(&mut self, frame: &AsciiFrame) {
        self.shown.borrow_mut().push(frame.clone());
    }

    fn clear(&mut self) {
        self.clears.set(self.clears.get() + 1);
    }
}

impl Screen {
    pub fn shown_count(&self) -> usize {
        self.shown.borrow().len()
    }
}

/// Audio whose clock only moves when told to.
#[derive(Clone, Default)]
pub struct FakeAudio {
    pub position: Rc<Cell<f64>>,
    pub sets: Rc<RefCell<Vec<f64>>>,
    pub plays: Rc<Cell<u32>>,
    pub stops: Rc<Cell<u32>>,
}

impl AudioSink for FakeAudio {
    fn current_time(&self) -> f64 {
        self.position.get()
    }

    fn set_current_time(&mut self, time: f64) -> reelscii::Result<()> {
        self.sets.borrow_mut().push(time);
        self.position.set(time);
        Ok(())
    }

    fn play(&mut self) -> reelscii::Result<()> {
        self.plays.set(self.plays.get() + 1);
        Ok(())
    }

    fn pause(&mut self) {}

    fn stop(&mut self) {
        self.stops.set(self.stops.get() + 1);
        self.position.set(0.0);
    }
}

#[derive(Clone, Default)]
pub struct MemoryRecorder {
    pub active: Rc<Cell<bool>>,
    pub timestamps: Rc<RefCell<Vec<f64>>>,
    pub finished: Rc<Cell<u32>>,
}

impl Recorder for MemoryRecorder {
    fn is_recording(&self) -> bool {
        self.active.get()
    }

    fn start(&mut self, _settings: &ProcessingSettings) -> reelscii::Result<()> {
        self.active.set(true);
        self.timestamps.borrow_mut().clear();
        Ok(())
    }

    fn add_frame(&mut self, _frame: &AsciiFrame, _width: u32, _height: u32, timestamp: f64) -> reelscii::Result<()> {
        self.timestamps.borrow_mut().push(timestamp);
        Ok(())
    }

    fn finish(&mut self) -> reelscii::Result<Option<PathBuf>> {
        self.active.set(false);
        self.finished.set(self.finished.get() + 1);
        Ok(Some(PathBuf::from("memory")))
    }
}

pub fn frame(text: &str) -> AsciiFrame {
    AsciiFrame::from_lines(vec![text.to_string()])
}
