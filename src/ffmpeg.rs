//! Media source and audio sink backed by the ffmpeg command line tools.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::Deserialize;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcCommand, Stdio};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, SampleError};
use crate::playback::AudioSink;
use crate::source::{MediaSource, ReadyState};

/// Width frames are decoded at before scaling to the output grid.
pub const DECODE_WIDTH: u32 = 640;

/// Locations of the ffmpeg binaries.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ffplay: PathBuf,
    pub decode_width: u32,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            ffplay: PathBuf::from("ffplay"),
            decode_width: DECODE_WIDTH,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Probe {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// `(duration, width, height)` from `ffprobe -of json` output.
fn parse_probe(raw: &[u8]) -> Result<(f64, u32, u32)> {
    let probe: Probe = serde_json::from_slice(raw)?;
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| Error::Load("no video stream".to_string()))?;
    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| Error::Load("unknown duration".to_string()))?;
    if stream.width == 0 || stream.height == 0 {
        return Err(Error::Load("video stream has no dimensions".to_string()));
    }
    Ok((duration, stream.width, stream.height))
}

/// Size frames are decoded at: at most `max_width` wide, aspect preserved.
fn decode_size(natural: (u32, u32), max_width: u32) -> (u32, u32) {
    let (nw, nh) = natural;
    let w = nw.min(max_width).max(1);
    let h = ((nh as f64 * w as f64 / nw.max(1) as f64).round() as u32).max(1);
    (w, h)
}

#[derive(Debug)]
struct Cursor {
    position: f64,
    frame: Option<RgbaImage>,
}

/// A video file decoded one frame per seek by spawning `ffmpeg`.
#[derive(Debug)]
pub struct FfmpegSource {
    path: PathBuf,
    config: FfmpegConfig,
    duration: f64,
    natural: (u32, u32),
    cursor: RefCell<Cursor>,
}

impl FfmpegSource {
    /// Probe `path` and open it as a source.
    pub async fn open(path: &Path, config: FfmpegConfig) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Load(format!("{} does not exist", path.display())));
        }
        let output = Command::new(&config.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height:format=duration", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Load(format!("running ffprobe: {}", e)))?;
        if !output.status.success() {
            return Err(Error::Load(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let (duration, width, height) = parse_probe(&output.stdout)?;
        info!(path = %path.display(), duration, width, height, "probed video");

        Ok(Self {
            path: path.to_path_buf(),
            config,
            duration,
            natural: (width, height),
            cursor: RefCell::new(Cursor {
                position: 0.0,
                frame: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn decode_at(&self, time: f64) -> std::result::Result<RgbaImage, SampleError> {
        let (w, h) = decode_size(self.natural, self.config.decode_width);
        let output = Command::new(&self.config.ffmpeg)
            .args(["-loglevel", "error", "-ss", format!("{:.3}", time).as_str(), "-i"])
            .arg(&self.path)
            .args(["-frames:v", "1", "-vf", format!("scale={}:{}", w, h).as_str()])
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "-"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SampleError::Decode(format!("running ffmpeg: {}", e)))?;
        if !output.status.success() {
            return Err(SampleError::Decode(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        if output.stdout.is_empty() {
            return Err(SampleError::Decode(format!("no frame at {:.3}s", time)));
        }
        RgbaImage::from_raw(w, h, output.stdout)
            .ok_or_else(|| SampleError::Decode(format!("short frame at {:.3}s", time)))
    }
}

impl MediaSource for FfmpegSource {
    fn identity(&self) -> String {
        self.path.display().to_string()
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn natural_size(&self) -> (u32, u32) {
        self.natural
    }

    /// Frames are decoded on demand, so an existing file is always fully buffered.
    fn ready_state(&self) -> ReadyState {
        if self.is_valid() {
            ReadyState::HaveEnoughData
        } else {
            ReadyState::HaveNothing
        }
    }

    fn is_valid(&self) -> bool {
        self.path.exists()
    }

    fn current_time(&self) -> f64 {
        self.cursor.borrow().position
    }

    fn set_current_time(&self, time: f64) {
        let mut cursor = self.cursor.borrow_mut();
        if cursor.position != time {
            cursor.position = time;
            cursor.frame = None;
        }
    }

    async fn seek(&self, time: f64) -> std::result::Result<(), SampleError> {
        if !self.is_valid() {
            return Err(SampleError::SourceLost(format!("{} disappeared", self.path.display())));
        }
        let frame = self.decode_at(time).await?;
        let mut cursor = self.cursor.borrow_mut();
        cursor.position = time;
        cursor.frame = Some(frame);
        Ok(())
    }

    fn draw(&self, width: u32, height: u32) -> std::result::Result<RgbaImage, SampleError> {
        let cursor = self.cursor.borrow();
        let frame = cursor
            .frame
            .as_ref()
            .ok_or_else(|| SampleError::Decode("no frame decoded yet".to_string()))?;
        if frame.dimensions() == (width, height) {
            return Ok(frame.clone());
        }
        Ok(imageops::resize(frame, width, height, FilterType::Triangle))
    }

    fn reload(&self) {
        debug!(path = %self.path.display(), "dropping decoded frame");
        self.cursor.borrow_mut().frame = None;
    }
}

/// Audio played through `ffplay`; restarted from the new offset on every seek.
pub struct FfplayAudio {
    ffplay: PathBuf,
    path: PathBuf,
    child: Option<Child>,
    offset: f64,
    started: Option<Instant>,
}

impl FfplayAudio {
    pub fn new(path: impl Into<PathBuf>, config: &FfmpegConfig) -> Self {
        Self {
            ffplay: config.ffplay.clone(),
            path: path.into(),
            child: None,
            offset: 0.0,
            started: None,
        }
    }

    fn is_playing(&self) -> bool {
        self.child.is_some()
    }

    fn spawn(&mut self) -> Result<()> {
        self.kill();
        let child = ProcCommand::new(&self.ffplay)
            .args(["-nodisp", "-autoexit", "-loglevel", "error", "-ss", format!("{:.3}", self.offset).as_str()])
            .arg(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Audio(format!("running ffplay: {}", e)))?;
        self.child = Some(child);
        self.started = Some(Instant::now());
        Ok(())
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to stop ffplay");
            }
            if let Err(e) = child.wait() {
                debug!(error = %e, "failed to reap ffplay");
            }
        }
        self.started = None;
    }
}

impl AudioSink for FfplayAudio {
    fn current_time(&self) -> f64 {
        self.offset + self.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0)
    }

    fn set_current_time(&mut self, time: f64) -> Result<()> {
        self.offset = time.max(0.0);
        if self.is_playing() {
            self.spawn()?;
        } else {
            self.started = None;
        }
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if self.is_playing() {
            return Ok(());
        }
        self.spawn()
    }

    fn pause(&mut self) {
        self.offset = self.current_time();
        self.kill();
    }

    fn stop(&mut self) {
        self.kill();
        self.offset = 0.0;
    }
}

impl Drop for FfplayAudio {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe() {
        let raw = br#"{"programs":[],"streams":[{"width":1920,"height":1080}],"format":{"duration":"12.480000"}}"#;
        let (duration, w, h) = parse_probe(raw).unwrap();
        assert_eq!((w, h), (1920, 1080));
        assert!((duration - 12.48).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_rejects_audio_only() {
        let raw = br#"{"streams":[],"format":{"duration":"3.0"}}"#;
        assert!(matches!(parse_probe(raw), Err(Error::Load(_))));
        let raw = br#"{"streams":[{"width":10,"height":10}],"format":{}}"#;
        assert!(matches!(parse_probe(raw), Err(Error::Load(_))));
    }

    #[test]
    fn test_decode_size_keeps_aspect() {
        assert_eq!(decode_size((1920, 1080), 640), (640, 360));
        assert_eq!(decode_size((320, 240), 640), (320, 240));
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let err = FfmpegSource::open(Path::new("/nonexistent/clip.mp4"), FfmpegConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Load(_)));
    }

    #[test]
    fn test_audio_offset_without_playback() {
        let mut audio = FfplayAudio::new("clip.mp4", &FfmpegConfig::default());
        audio.set_current_time(4.5).unwrap();
        assert_eq!(audio.current_time(), 4.5);
        audio.stop();
        assert_eq!(audio.current_time(), 0.0);
    }
}
