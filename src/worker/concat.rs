use crate::config::ToolConfig;
use crate::error::PipelineError;
use crate::storage::{EpisodeLayout, AUDIO_EXTENSION};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// External audio tooling used to stitch segments into one file.
#[async_trait]
pub trait AudioToolchain: Send + Sync {
    /// Losslessly join the files named in a concat list into `output`.
    async fn concat(&self, list_path: &Path, output: &Path) -> Result<(), PipelineError>;

    /// Duration of an audio file in seconds, `None` when the container
    /// does not report one.
    async fn probe_duration(&self, path: &Path) -> Result<Option<f64>, PipelineError>;
}

pub struct FfmpegToolchain {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegToolchain {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
            ffprobe: tools.ffprobe.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

async fn run_tool(tool: &'static str, mut command: Command) -> Result<Vec<u8>, PipelineError> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PipelineError::Tool {
            tool,
            message: format!("failed to spawn: {}", e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        log::error!("{} stderr: {}", tool, stderr);
        return Err(PipelineError::Tool {
            tool,
            message: format!("{} ({})", stderr.trim(), output.status),
        });
    }
    Ok(output.stdout)
}

#[async_trait]
impl AudioToolchain for FfmpegToolchain {
    async fn concat(&self, list_path: &Path, output: &Path) -> Result<(), PipelineError> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list_path)
            .args(["-c", "copy"])
            .arg(output);
        run_tool("ffmpeg", command).await?;
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> Result<Option<f64>, PipelineError> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args(["-v", "error", "-print_format", "json", "-show_format"])
            .arg(path);
        let stdout = run_tool("ffprobe", command).await?;
        let probe: ProbeOutput = serde_json::from_slice(&stdout)?;
        Ok(probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.trim().parse::<f64>().ok()))
    }
}

/// Segment files in `dir`, sorted by file name.
async fn list_segment_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_audio = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(AUDIO_EXTENSION))
            .unwrap_or(false);
        if is_audio && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Render a concat list. Single quotes in paths are closed, escaped and
/// reopened so the demuxer reads them literally.
pub fn render_concat_list(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Join an episode's segment files into its final audio and return the
/// probed duration in seconds.
///
/// The duration falls back to 0 when the probe fails or reports nothing
/// usable; the concatenated file is kept either way.
pub async fn concatenate_segments(
    toolchain: &dyn AudioToolchain,
    layout: &EpisodeLayout,
    episode_id: &str,
) -> Result<f64, PipelineError> {
    let files = list_segment_files(&layout.segments_dir(episode_id)).await?;
    if files.is_empty() {
        return Err(PipelineError::NoSegments);
    }

    let list_path = layout.concat_list_path(episode_id);
    tokio::fs::write(&list_path, render_concat_list(&files)).await?;

    let output = layout.episode_audio_path(episode_id);
    log::info!(
        "Concatenating {} segments for episode {} into {:?}",
        files.len(),
        episode_id,
        output
    );
    toolchain.concat(&list_path, &output).await?;

    let duration = match toolchain.probe_duration(&output).await {
        Ok(Some(d)) if d.is_finite() && d > 0.0 => d,
        Ok(_) => {
            log::warn!("No usable duration reported for {:?}", output);
            0.0
        }
        Err(e) => {
            log::warn!("Failed to probe duration of {:?}: {}", output, e);
            0.0
        }
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::FakeToolchain;
    use tempfile::TempDir;

    #[test]
    fn test_concat_list_escapes_single_quotes() {
        let files = vec![
            PathBuf::from("/data/a/000-hostA.mp3"),
            PathBuf::from("/data/it's/001-hostB.mp3"),
        ];
        assert_eq!(
            render_concat_list(&files),
            "file '/data/a/000-hostA.mp3'\nfile '/data/it'\\''s/001-hostB.mp3'\n"
        );
    }

    #[tokio::test]
    async fn test_segments_joined_in_name_order() {
        let temp = TempDir::new().unwrap();
        let layout = EpisodeLayout::new(temp.path());
        layout.create_episode_dirs("ep1").unwrap();
        let segments = layout.segments_dir("ep1");
        // created out of order, plus a stray non-audio file
        for name in ["002-hostA.mp3", "000-hostA.mp3", "notes.txt", "001-hostB.mp3"] {
            std::fs::write(segments.join(name), b"x").unwrap();
        }

        let toolchain = FakeToolchain::with_duration(Some(312.5));
        let duration = concatenate_segments(&toolchain, &layout, "ep1").await.unwrap();
        assert_eq!(duration, 312.5);

        let list = std::fs::read_to_string(layout.concat_list_path("ep1")).unwrap();
        let names: Vec<&str> = list
            .lines()
            .map(|l| l.rsplit('/').next().unwrap().trim_end_matches('\''))
            .collect();
        assert_eq!(names, vec!["000-hostA.mp3", "001-hostB.mp3", "002-hostA.mp3"]);
        assert!(layout.episode_audio_path("ep1").exists());
    }

    #[tokio::test]
    async fn test_empty_segments_dir_is_an_error() {
        let temp = TempDir::new().unwrap();
        let layout = EpisodeLayout::new(temp.path());
        layout.create_episode_dirs("ep1").unwrap();

        let toolchain = FakeToolchain::with_duration(Some(1.0));
        let err = concatenate_segments(&toolchain, &layout, "ep1").await.unwrap_err();
        assert!(matches!(err, PipelineError::NoSegments));
        assert_eq!(err.to_string(), "No audio segments found to concatenate");
        assert_eq!(toolchain.concat_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_duration_defaults_to_zero() {
        let temp = TempDir::new().unwrap();
        let layout = EpisodeLayout::new(temp.path());
        layout.create_episode_dirs("ep1").unwrap();
        std::fs::write(layout.segments_dir("ep1").join("000-hostA.mp3"), b"x").unwrap();

        let toolchain = FakeToolchain::with_duration(None);
        let duration = concatenate_segments(&toolchain, &layout, "ep1").await.unwrap();
        assert_eq!(duration, 0.0);
    }

    #[tokio::test]
    async fn test_concat_failure_propagates() {
        let temp = TempDir::new().unwrap();
        let layout = EpisodeLayout::new(temp.path());
        layout.create_episode_dirs("ep1").unwrap();
        std::fs::write(layout.segments_dir("ep1").join("000-hostA.mp3"), b"x").unwrap();

        let toolchain = FakeToolchain::failing();
        let err = concatenate_segments(&toolchain, &layout, "ep1").await.unwrap_err();
        assert!(matches!(err, PipelineError::Tool { tool: "ffmpeg", .. }));
    }
}
