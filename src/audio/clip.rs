//! Finalized recording clips and the pre-upload validation policy.

use std::path::{Path, PathBuf};

use crate::settings::ClipSettings;

pub const WAV_MIME: &str = "audio/wav";

/// Immutable result of one recording session: a finalized WAV on disk plus
/// the measurements validation needs. Produced exactly once per recording.
#[derive(Debug, Clone)]
pub struct Clip {
    pub wav_path: PathBuf,
    pub mime_type: &'static str,
    pub duration_ms: u64,
    pub size_bytes: u64,
}

impl Clip {
    pub fn new(wav_path: PathBuf, duration_ms: u64, size_bytes: u64) -> Self {
        Self {
            wav_path,
            mime_type: WAV_MIME,
            duration_ms,
            size_bytes,
        }
    }

    /// Build a Clip from an existing WAV file (e.g. a pre-recorded answer),
    /// reading duration from the header and size from the filesystem.
    pub fn from_wav_file(path: &Path) -> Result<Self, String> {
        let reader = hound::WavReader::open(path).map_err(|e| format!("Open {:?}: {}", path, e))?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(format!("Invalid sample rate in {:?}", path));
        }
        let duration_ms = reader.duration() as u64 * 1000 / spec.sample_rate as u64;
        let size_bytes = std::fs::metadata(path)
            .map_err(|e| format!("Stat {:?}: {}", path, e))?
            .len();
        Ok(Self::new(path.to_path_buf(), duration_ms, size_bytes))
    }

    /// Whether the clip is substantial enough to be worth transcribing.
    /// Boundaries are inclusive on the accept side: a clip exactly at the
    /// minimum duration or size passes.
    pub fn meets(&self, policy: &ClipSettings) -> bool {
        self.duration_ms >= policy.min_duration_ms && self.size_bytes >= policy.min_size_bytes
    }
}
