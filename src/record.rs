use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::convert::AsciiFrame;
use crate::error::{Error, Result};
use crate::playback::Recorder;
use crate::settings::ProcessingSettings;

/// Records frames as `frame_NNNN.txt` files in a directory.
///
/// `finish` writes a `details.md` summary and returns its path.
#[derive(Debug)]
pub struct DirectoryRecorder {
    dir: PathBuf,
    active: bool,
    settings: Option<ProcessingSettings>,
    frame_count: usize,
    first_timestamp: Option<f64>,
    last_timestamp: f64,
    dimensions: (u32, u32),
}

impl DirectoryRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            active: false,
            settings: None,
            frame_count: 0,
            first_timestamp: None,
            last_timestamp: 0.0,
            dimensions: (0, 0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Remove frames left over from a previous recording.
    fn clean(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                if name.starts_with("frame_") && name.ends_with(".txt") {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }
}

impl Recorder for DirectoryRecorder {
    fn is_recording(&self) -> bool {
        self.active
    }

    fn start(&mut self, settings: &ProcessingSettings) -> Result<()> {
        if self.active {
            return Err(Error::Recorder("already recording".to_string()));
        }
        fs::create_dir_all(&self.dir)?;
        self.clean()?;
        self.active = true;
        self.settings = Some(*settings);
        self.frame_count = 0;
        self.first_timestamp = None;
        self.last_timestamp = 0.0;
        self.dimensions = (0, 0);
        info!(dir = %self.dir.display(), "recording to directory");
        Ok(())
    }

    fn add_frame(&mut self, frame: &AsciiFrame, width: u32, height: u32, timestamp: f64) -> Result<()> {
        if !self.active {
            return Err(Error::Recorder("not recording".to_string()));
        }
        self.frame_count += 1;
        let path = self.dir.join(format!("frame_{:04}.txt", self.frame_count));
        let mut text = frame.to_text();
        text.push('\n');
        fs::write(&path, text)?;

        self.first_timestamp.get_or_insert(timestamp);
        self.last_timestamp = timestamp;
        self.dimensions = (width, height);
        debug!(frame = self.frame_count, timestamp, "recorded frame");
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>> {
        if !self.active {
            return Ok(None);
        }
        self.active = false;

        let span = self.last_timestamp - self.first_timestamp.unwrap_or(0.0);
        let mut details = format!(
            "Version: {}\nFrames: {}\nColumns: {}\nRows: {}\nDuration: {:.2}s",
            env!("CARGO_PKG_VERSION"),
            self.frame_count,
            self.dimensions.0,
            self.dimensions.1,
            span.max(0.0)
        );
        if let Some(settings) = &self.settings {
            details.push_str(&format!("\nFPS: {}\nTier: {}", settings.frame_rate, settings.quality_tier.name()));
        }

        let details_path = self.dir.join("details.md");
        fs::write(&details_path, details)?;
        info!(frames = self.frame_count, path = %details_path.display(), "recording finished");
        Ok(Some(details_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_numbered_frames_and_details() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = DirectoryRecorder::new(dir.path().join("out"));
        rec.start(&ProcessingSettings::default()).unwrap();
        assert!(rec.is_recording());

        let frame = AsciiFrame::from_lines(vec!["ab".into(), "cd".into()]);
        rec.add_frame(&frame, 2, 2, 0.5).unwrap();
        rec.add_frame(&frame, 2, 2, 1.5).unwrap();

        let details = rec.finish().unwrap().unwrap();
        assert!(!rec.is_recording());
        assert_eq!(fs::read_to_string(rec.dir().join("frame_0002.txt")).unwrap(), "ab\ncd\n");
        let text = fs::read_to_string(details).unwrap();
        assert!(text.contains("Frames: 2"));
        assert!(text.contains("Duration: 1.00s"));
    }

    #[test]
    fn test_start_clears_previous_frames() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("frame_0009.txt"), "old").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        let mut rec = DirectoryRecorder::new(dir.path());
        rec.start(&ProcessingSettings::default()).unwrap();
        assert!(!dir.path().join("frame_0009.txt").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_add_frame_requires_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = DirectoryRecorder::new(dir.path());
        assert!(rec.add_frame(&AsciiFrame::blank(1, 1), 1, 1, 0.0).is_err());
        assert_eq!(rec.finish().unwrap(), None);
    }
}
