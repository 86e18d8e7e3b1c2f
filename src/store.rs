//! On-disk store for precomputed frame sequences.
//!
//! Entries are keyed by source identity and settings fingerprint. Entries
//! older than the freshness ceiling read as absent; payloads above the size
//! ceiling are refused.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::convert::AsciiFrame;
use crate::error::{Error, Result};
use crate::settings::ProcessingSettings;

pub const MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const MAX_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredSequence {
    pub source: String,
    pub settings: ProcessingSettings,
    pub created_at_unix: u64,
    pub frames: Vec<AsciiFrame>,
}

#[derive(Debug, Clone)]
pub struct FrameStore {
    root: PathBuf,
    max_age: Duration,
    max_bytes: usize,
}

impl FrameStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_age: MAX_AGE,
            max_bytes: MAX_BYTES,
        }
    }

    pub fn with_limits(mut self, max_age: Duration, max_bytes: usize) -> Self {
        self.max_age = max_age;
        self.max_bytes = max_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage key for a source rendered with `settings`.
    pub fn key(source: &str, settings: &ProcessingSettings) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(settings.fingerprint().as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(32);
        for byte in &digest[..16] {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    /// Fetch a fresh sequence; stale or unreadable entries are removed and read as `None`.
    pub fn load(&self, source: &str, settings: &ProcessingSettings) -> Option<StoredSequence> {
        let path = self.path_for(&Self::key(source, settings));
        let raw = fs::read_to_string(&path).ok()?;
        let stored: StoredSequence = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable stored sequence");
                discard(&path);
                return None;
            }
        };
        if stored.source != source || stored.settings != *settings {
            debug!(path = %path.display(), "stored sequence key collision");
            return None;
        }
        let age = now_unix().saturating_sub(stored.created_at_unix);
        if age > self.max_age.as_secs() {
            info!(path = %path.display(), age_secs = age, "stored sequence expired");
            discard(&path);
            return None;
        }
        Some(stored)
    }

    /// Persist `frames`; refuses payloads over the size ceiling without writing anything.
    pub fn save(&self, source: &str, settings: &ProcessingSettings, frames: &[AsciiFrame]) -> Result<PathBuf> {
        self.save_at(source, settings, frames, now_unix())
    }

    /// [`FrameStore::save`] with an explicit creation time.
    pub fn save_at(&self, source: &str, settings: &ProcessingSettings, frames: &[AsciiFrame], created_at_unix: u64) -> Result<PathBuf> {
        let stored = StoredSequence {
            source: source.to_string(),
            settings: *settings,
            created_at_unix,
            frames: frames.to_vec(),
        };
        let payload = serde_json::to_string(&stored)?;
        if payload.len() > self.max_bytes {
            warn!(size = payload.len(), limit = self.max_bytes, "sequence too large to store");
            return Err(Error::TooLarge {
                size: payload.len(),
                limit: self.max_bytes,
            });
        }
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(&Self::key(source, settings));
        fs::write(&path, payload)?;
        info!(path = %path.display(), frames = frames.len(), "stored sequence");
        Ok(path)
    }

    pub fn remove(&self, source: &str, settings: &ProcessingSettings) -> Result<bool> {
        let path = self.path_for(&Self::key(source, settings));
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        debug!(path = %path.display(), error = %e, "failed to remove stored sequence");
    }
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<AsciiFrame> {
        (0..n).map(|i| AsciiFrame::from_lines(vec![format!("{:>4}", i)])).collect()
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path());
        let settings = ProcessingSettings::default();
        store.save("clip.mp4", &settings, &frames(3)).unwrap();

        let loaded = store.load("clip.mp4", &settings).unwrap();
        assert_eq!(loaded.frames, frames(3));
        assert!(store.load("other.mp4", &settings).is_none());
        assert!(store.load("clip.mp4", &settings.with_frame_rate(5)).is_none());
    }

    #[test]
    fn test_key_is_fixed_across_builds() {
        let settings = ProcessingSettings::default();
        assert_eq!(settings.fingerprint(), "120x40@24:medium:Standard");
        assert_eq!(FrameStore::key("clip.mp4", &settings), "6a509a56ee6f896d692d70c8f45b08d9");
        assert_ne!(FrameStore::key("clip.mp4", &settings.with_frame_rate(5)), FrameStore::key("clip.mp4", &settings));
    }

    #[test]
    fn test_expired_entries_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path());
        let settings = ProcessingSettings::default();
        let eight_days_ago = now_unix() - 8 * 24 * 60 * 60;
        let path = store.save_at("clip.mp4", &settings, &frames(1), eight_days_ago).unwrap();

        assert!(store.load("clip.mp4", &settings).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("store")).with_limits(MAX_AGE, 64);
        let settings = ProcessingSettings::default();
        let err = store.save("clip.mp4", &settings, &frames(20)).unwrap_err();
        assert!(matches!(err, Error::TooLarge { limit: 64, .. }));
        assert!(!store.root().exists());
    }

    #[test]
    fn test_corrupt_entry_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path());
        let settings = ProcessingSettings::default();
        let path = store.save("clip.mp4", &settings, &frames(1)).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert!(store.load("clip.mp4", &settings).is_none());
        assert!(!store.remove("clip.mp4", &settings).unwrap());
    }
}
