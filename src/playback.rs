//! Playback driver: paces frame production, display, recording and audio.
//!
//! The driver is the only context that touches its [`Pipeline`]. Every
//! scheduled tick carries the generation it was scheduled in; any transition
//! out of `Playing` bumps the generation, so a tick scheduled before the
//! transition can never fire after it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::convert::AsciiFrame;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::settings::{DeviceClass, ProcessingSettings};
use crate::source::{MediaSource, ReadyState};

/// Audio/driver divergence that triggers a resync, in seconds.
pub const AUDIO_SYNC_THRESHOLD: f64 = 0.1;
/// Minimum gap between ticks on constrained devices.
pub const CONSTRAINED_TICK_FLOOR: Duration = Duration::from_millis(16);

const LOAD_POLL: Duration = Duration::from_millis(100);

fn load_ceiling(device: DeviceClass) -> Duration {
    match device {
        DeviceClass::Standard => Duration::from_secs(10),
        DeviceClass::Constrained => Duration::from_secs(20),
    }
}

/// Where finished frames go.
pub trait FrameSink {
    fn show(&mut self, frame: &AsciiFrame);
    fn clear(&mut self);
}

/// The audio track played alongside the frames.
pub trait AudioSink {
    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, time: f64) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn stop(&mut self);
}

/// Recording capability fed with every presented frame while active.
pub trait Recorder {
    fn is_recording(&self) -> bool;
    fn start(&mut self, settings: &ProcessingSettings) -> Result<()>;
    fn add_frame(&mut self, frame: &AsciiFrame, width: u32, height: u32, timestamp: f64) -> Result<()>;
    /// Stop recording; returns the produced artifact, if any.
    fn finish(&mut self) -> Result<Option<PathBuf>>;
}

/// Silent audio that only remembers its position.
#[derive(Debug, Default)]
pub struct NullAudio {
    position: f64,
}

impl AudioSink for NullAudio {
    fn current_time(&self) -> f64 {
        self.position
    }

    fn set_current_time(&mut self, time: f64) -> Result<()> {
        self.position = time;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        Ok(())
    }

    fn pause(&mut self) {}

    fn stop(&mut self) {
        self.position = 0.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Stopped,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Ready => "ready",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Frames sampled on demand from the source.
    Live,
    /// Frames taken from a pre-rendered list at a fixed rate.
    Precomputed,
}

/// Snapshot of the driver's position and counters.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackInfo {
    pub state: PlaybackState,
    pub mode: Option<PlaybackMode>,
    pub current_time: f64,
    pub current_frame: usize,
    pub total_frames: usize,
    pub recording: bool,
    pub settings: ProcessingSettings,
    pub frames_displayed: u64,
    pub blank_frames: u64,
}

/// Control messages for [`PlaybackDriver::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    /// Toggle between paused and playing.
    TogglePause,
    Stop,
    StartRecording,
    StopRecording,
    Quit,
}

#[derive(Debug, Clone, Copy)]
struct PendingTick {
    at: Instant,
    generation: u64,
}

pub struct PlaybackDriver<S> {
    pipeline: Pipeline<S>,
    display: Box<dyn FrameSink>,
    audio: Box<dyn AudioSink>,
    recorder: Option<Box<dyn Recorder>>,
    recording: bool,
    state: PlaybackState,
    mode: Option<PlaybackMode>,
    frames: Vec<AsciiFrame>,
    precomputed_fps: u32,
    origin: Option<Instant>,
    current_time: f64,
    position: Option<usize>,
    last_displayed: Option<AsciiFrame>,
    pending: Option<PendingTick>,
    generation: u64,
    frames_displayed: u64,
    blank_frames: u64,
}

impl<S: MediaSource> PlaybackDriver<S> {
    pub fn new(pipeline: Pipeline<S>, display: Box<dyn FrameSink>, audio: Box<dyn AudioSink>) -> Self {
        Self {
            pipeline,
            display,
            audio,
            recorder: None,
            recording: false,
            state: PlaybackState::Idle,
            mode: None,
            frames: Vec::new(),
            precomputed_fps: 1,
            origin: None,
            current_time: 0.0,
            position: None,
            last_displayed: None,
            pending: None,
            generation: 0,
            frames_displayed: 0,
            blank_frames: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: Box<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn pipeline(&self) -> &Pipeline<S> {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline<S> {
        &mut self.pipeline
    }

    /// The frame most recently presented.
    pub fn last_frame(&self) -> Option<&AsciiFrame> {
        self.last_displayed.as_ref()
    }

    /// When the next tick is due, if one is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.at)
    }

    pub fn playback_info(&self) -> PlaybackInfo {
        PlaybackInfo {
            state: self.state,
            mode: self.mode,
            current_time: self.current_time,
            current_frame: self.position.unwrap_or(0),
            total_frames: self.frames.len(),
            recording: self.recording,
            settings: *self.pipeline.settings(),
            frames_displayed: self.frames_displayed,
            blank_frames: self.blank_frames,
        }
    }

    /// Attach `source` and wait (bounded) until it can play.
    ///
    /// If the source is still not buffered when the wait runs out the driver
    /// enters `Ready` anyway and logs a warning.
    pub async fn load(&mut self, source: S) -> Result<()> {
        self.require(&[PlaybackState::Idle, PlaybackState::Ready, PlaybackState::Stopped], "load a source")?;
        self.cancel_pending();
        self.set_state(PlaybackState::Loading);

        if !source.is_valid() {
            self.set_state(PlaybackState::Idle);
            return Err(Error::Load(format!("{} is not a valid media source", source.identity())));
        }
        self.pipeline.attach(source);

        let ceiling = load_ceiling(self.pipeline.settings().device_class);
        let started = Instant::now();
        loop {
            let source = self.pipeline.source().ok_or(Error::NoSource)?;
            if !source.is_valid() {
                let identity = source.identity();
                self.pipeline.detach();
                self.set_state(PlaybackState::Idle);
                return Err(Error::Load(format!("{} was lost while loading", identity)));
            }
            let ready = source.ready_state();
            if ready >= ReadyState::HaveFutureData {
                break;
            }
            if started.elapsed() >= ceiling {
                warn!(?ready, waited = ?started.elapsed(), "source not buffered, entering ready optimistically");
                break;
            }
            tokio::time::sleep(LOAD_POLL).await;
        }

        self.reset_position();
        self.set_state(PlaybackState::Ready);
        Ok(())
    }

    /// Start live playback, sampling frames on demand.
    pub fn play_live(&mut self) -> Result<()> {
        self.require(&[PlaybackState::Ready, PlaybackState::Stopped], "start live playback")?;
        if self.pipeline.source().is_none() {
            return Err(Error::NoSource);
        }
        self.frames.clear();
        self.begin(PlaybackMode::Live);
        Ok(())
    }

    /// Start playback of a pre-rendered sequence at `fps`, looping at the end.
    ///
    /// Unlike live playback this does not need a loaded source.
    pub fn play_precomputed(&mut self, frames: Vec<AsciiFrame>, fps: u32) -> Result<()> {
        self.require(&[PlaybackState::Idle, PlaybackState::Ready, PlaybackState::Stopped], "start precomputed playback")?;
        if frames.is_empty() {
            return Err(Error::Load("precomputed sequence is empty".to_string()));
        }
        self.frames = frames;
        self.precomputed_fps = fps.max(1);
        self.begin(PlaybackMode::Precomputed);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require(&[PlaybackState::Playing], "pause")?;
        self.cancel_pending();
        self.audio.pause();
        self.set_state(PlaybackState::Paused);
        Ok(())
    }

    /// Resume from where `pause` left off; elapsed-time accounting stays continuous.
    pub fn resume(&mut self) -> Result<()> {
        self.require(&[PlaybackState::Paused], "resume")?;
        let now = Instant::now();
        self.origin = Some(now.checked_sub(Duration::from_secs_f64(self.current_time)).unwrap_or(now));
        if let Err(e) = self.audio.play() {
            warn!(error = %e, "failed to resume audio");
        }
        self.set_state(PlaybackState::Playing);
        self.schedule(now);
        Ok(())
    }

    /// Stop from any state: cancel ticks, stop audio, clear the display, rewind.
    pub fn stop(&mut self) {
        self.cancel_pending();
        self.audio.stop();
        self.display.clear();
        if self.recording {
            match self.finish_recording() {
                Ok(Some(path)) => info!(path = %path.display(), "recording saved"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to finish recording"),
            }
        }
        self.reset_position();
        self.sync_source(0.0);
        self.set_state(PlaybackState::Stopped);
    }

    /// Stop and release the source; clears cache and latency history.
    pub fn reset(&mut self) -> Option<S> {
        self.stop();
        self.frames.clear();
        self.mode = None;
        self.frames_displayed = 0;
        self.blank_frames = 0;
        self.set_state(PlaybackState::Idle);
        self.pipeline.reset()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn start_recording(&mut self) -> Result<()> {
        self.require(&[PlaybackState::Ready, PlaybackState::Playing, PlaybackState::Paused], "start recording")?;
        let settings = *self.pipeline.settings();
        let recorder = self
            .recorder
            .as_mut()
            .ok_or_else(|| Error::Recorder("no recorder attached".to_string()))?;
        recorder.start(&settings)?;
        self.recording = true;
        info!("recording started");
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<Option<PathBuf>> {
        if !self.recording {
            return Ok(None);
        }
        self.finish_recording()
    }

    /// Wait for the pending tick and run it. Returns `false` if nothing is scheduled.
    pub async fn step(&mut self) -> Result<bool> {
        let Some(at) = self.next_deadline() else {
            return Ok(false);
        };
        tokio::time::sleep_until(at).await;
        self.tick().await?;
        Ok(true)
    }

    /// Run the pending tick now, if it is still current.
    pub async fn tick(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        if pending.generation != self.generation || self.state != PlaybackState::Playing {
            debug!(generation = pending.generation, "dropping stale tick");
            return Ok(());
        }
        match self.mode {
            Some(PlaybackMode::Live) => self.live_tick().await,
            Some(PlaybackMode::Precomputed) => {
                self.precomputed_tick(pending.at);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Drive playback until `Quit`, a closed channel, or a terminal error.
    pub async fn run(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Result<()> {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Quit) => {
                        self.stop();
                        return Ok(());
                    }
                    Some(command) => {
                        if let Err(e) = self.handle(command) {
                            warn!(?command, error = %e, "command rejected");
                        }
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.tick().await?;
                }
            }
        }
    }

    fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::TogglePause => match self.state {
                PlaybackState::Paused => self.resume(),
                _ => self.pause(),
            },
            Command::Stop => {
                self.stop();
                Ok(())
            }
            Command::StartRecording => self.start_recording(),
            Command::StopRecording => {
                if let Some(path) = self.stop_recording()? {
                    info!(path = %path.display(), "recording saved");
                }
                Ok(())
            }
            Command::Quit => Ok(()),
        }
    }

    async fn live_tick(&mut self) -> Result<()> {
        let started = Instant::now();
        let origin = *self.origin.get_or_insert(started);
        let source = self.pipeline.source().ok_or(Error::NoSource)?;
        let duration = source.duration();

        let mut time = started.duration_since(origin).as_secs_f64();
        if time > duration {
            info!(duration, "reached end of source, looping");
            self.origin = Some(started);
            time = 0.0;
            self.restart_audio();
        }
        self.current_time = time;
        self.sync_source(time);

        let frame = match self.pipeline.frame_at(time).await {
            Ok(frame) => frame,
            Err(Error::Sample(e)) if e.is_terminal() => {
                error!(time, error = %e, "media source lost, stopping playback");
                self.stop();
                return Err(Error::Sample(e));
            }
            Err(Error::NoSource) => {
                self.stop();
                return Err(Error::NoSource);
            }
            Err(e) => {
                warn!(time, error = %e, "frame unavailable, showing blank frame");
                self.blank_frames += 1;
                self.pipeline.blank_frame()
            }
        };
        self.present(frame, time);
        self.sync_audio(time);

        let work = started.elapsed();
        let settings = self.pipeline.observe_latency(work.as_secs_f64() * 1000.0);
        let mut delay = settings.frame_budget().saturating_sub(work);
        if settings.device_class.is_constrained() {
            delay = delay.max(CONSTRAINED_TICK_FLOOR);
        }
        self.schedule(Instant::now() + delay);
        Ok(())
    }

    fn precomputed_tick(&mut self, scheduled_at: Instant) {
        let len = self.frames.len();
        let next = match self.position {
            None => 0,
            Some(p) if p + 1 >= len => {
                debug!(frames = len, "end of sequence, looping");
                self.restart_audio();
                0
            }
            Some(p) => p + 1,
        };
        self.position = Some(next);
        self.current_time = next as f64 / f64::from(self.precomputed_fps);

        let frame = self.frames[next].clone();
        self.present(frame, self.current_time);
        self.sync_audio(self.current_time);

        let interval = Duration::from_secs_f64(1.0 / f64::from(self.precomputed_fps));
        self.schedule((scheduled_at + interval).max(Instant::now()));
    }

    fn present(&mut self, frame: AsciiFrame, timestamp: f64) {
        if self.last_displayed.as_ref() != Some(&frame) {
            self.display.show(&frame);
            self.frames_displayed += 1;
        }
        if self.recording {
            if let Some(recorder) = self.recorder.as_mut().filter(|r| r.is_recording()) {
                let (w, h) = (frame.width() as u32, frame.height() as u32);
                if let Err(e) = recorder.add_frame(&frame, w, h, timestamp) {
                    warn!(timestamp, error = %e, "recorder rejected frame");
                }
            }
        }
        self.last_displayed = Some(frame);
    }

    fn sync_audio(&mut self, time: f64) {
        let audio_time = self.audio.current_time();
        if (audio_time - time).abs() > AUDIO_SYNC_THRESHOLD {
            match self.audio.set_current_time(time) {
                Ok(()) => debug!(audio_time, time, "resynced audio"),
                Err(e) => warn!(audio_time, time, error = %e, "audio resync failed"),
            }
        }
    }

    /// Keep the source cursor at the playback position.
    fn sync_source(&self, time: f64) {
        if let Some(source) = self.pipeline.source() {
            source.set_current_time(time);
        }
    }

    fn restart_audio(&mut self) {
        if let Err(e) = self.audio.set_current_time(0.0).and_then(|_| self.audio.play()) {
            warn!(error = %e, "failed to restart audio");
        }
    }

    fn begin(&mut self, mode: PlaybackMode) {
        self.cancel_pending();
        self.reset_position();
        self.mode = Some(mode);
        let now = Instant::now();
        self.origin = Some(now);
        if let Err(e) = self.audio.set_current_time(0.0).and_then(|_| self.audio.play()) {
            warn!(error = %e, "failed to start audio");
        }
        self.set_state(PlaybackState::Playing);
        self.schedule(now);
    }

    fn finish_recording(&mut self) -> Result<Option<PathBuf>> {
        self.recording = false;
        match self.recorder.as_mut() {
            Some(recorder) => recorder.finish(),
            None => Ok(None),
        }
    }

    fn schedule(&mut self, at: Instant) {
        self.pending = Some(PendingTick {
            at,
            generation: self.generation,
        });
    }

    fn cancel_pending(&mut self) {
        self.pending = None;
        self.generation = self.generation.wrapping_add(1);
    }

    fn reset_position(&mut self) {
        self.origin = None;
        self.current_time = 0.0;
        self.position = None;
        self.last_displayed = None;
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "playback state");
            self.state = state;
        }
    }

    fn require(&self, allowed: &[PlaybackState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                state: self.state.to_string(),
                action,
            })
        }
    }
}
