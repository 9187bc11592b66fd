//! On-disk layout of episode artifacts.
//!
//! ```text
//! <data>/episodes/<id>/segments/000-hostA.mp3
//! <data>/episodes/<id>/episode.mp3
//! <data>/episodes/<id>/concat-list.txt
//! ```

use std::path::{Path, PathBuf};

/// Extension of per-segment and episode audio files.
pub const AUDIO_EXTENSION: &str = "mp3";

#[derive(Debug, Clone)]
pub struct EpisodeLayout {
    episodes_root: PathBuf,
}

impl EpisodeLayout {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            episodes_root: data_dir.join("episodes"),
        }
    }

    pub fn episode_dir(&self, id: &str) -> PathBuf {
        self.episodes_root.join(id)
    }

    pub fn segments_dir(&self, id: &str) -> PathBuf {
        self.episode_dir(id).join("segments")
    }

    pub fn episode_audio_path(&self, id: &str) -> PathBuf {
        self.episode_dir(id)
            .join(format!("episode.{}", AUDIO_EXTENSION))
    }

    pub fn concat_list_path(&self, id: &str) -> PathBuf {
        self.episode_dir(id).join("concat-list.txt")
    }

    /// Create the episode and segment directories.
    pub fn create_episode_dirs(&self, id: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.segments_dir(id))
    }
}

/// Minimum zero-padding of segment indices.
const MIN_INDEX_WIDTH: usize = 3;

/// Segment file name: zero-padded index plus speaker tag, so a
/// lexicographic sort gives script order. Indices are padded to at least
/// the width of `total`.
pub fn segment_file_name(index: usize, total: usize, speaker_tag: &str) -> String {
    let width = total.to_string().len().max(MIN_INDEX_WIDTH);
    format!("{:0width$}-{}.{}", index, speaker_tag, AUDIO_EXTENSION, width = width)
}
