//! Export pipeline configuration.

use std::path::{Path, PathBuf};

use crate::error::{BingkaiError, BingkaiResult};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// The bingkai overlay image. `None` runs the pipeline in degraded
    /// source-only mode.
    pub overlay_path: Option<PathBuf>,
    /// Directory downloads are written into.
    pub out_dir: PathBuf,
    /// Filename prefix; outputs are named `<prefix>-<epoch-millis>.<ext>`.
    pub file_prefix: String,
    pub target_width: u32,
    pub target_height: u32,
    /// Opaque background color behind the source.
    pub background_rgba: [u8; 4],
    /// Frame rate used when the source does not report a usable one.
    pub fallback_fps: u32,
    pub video_preset: String,
    pub video_crf: u32,
    pub audio_bitrate_kbps: u32,
    /// Wall-clock allowance on top of the source duration before the capture
    /// tier finalizes early.
    pub capture_timeout_buffer_sec: f64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            overlay_path: None,
            out_dir: PathBuf::from("."),
            file_prefix: "bingkai".to_string(),
            target_width: crate::compositor::REELS_WIDTH,
            target_height: crate::compositor::REELS_HEIGHT,
            background_rgba: [0, 0, 0, 255],
            fallback_fps: 30,
            video_preset: "veryfast".to_string(),
            video_crf: 23,
            audio_bitrate_kbps: 128,
            capture_timeout_buffer_sec: 10.0,
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> BingkaiResult<()> {
        if self.target_width == 0 || self.target_height == 0 {
            return Err(BingkaiError::validation(
                "target width/height must be non-zero",
            ));
        }
        if !self.target_width.is_multiple_of(2) || !self.target_height.is_multiple_of(2) {
            return Err(BingkaiError::validation(
                "target width/height must be even (required for yuv420p video output)",
            ));
        }
        if self.file_prefix.is_empty() {
            return Err(BingkaiError::validation("file prefix must be non-empty"));
        }
        if self.fallback_fps == 0 {
            return Err(BingkaiError::validation("fallback fps must be non-zero"));
        }
        if self.capture_timeout_buffer_sec < 0.0 {
            return Err(BingkaiError::validation(
                "capture timeout buffer must be non-negative",
            ));
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> BingkaiResult<Self> {
        use anyhow::Context as _;
        let f = std::fs::File::open(path)
            .with_context(|| format!("open config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_reader(std::io::BufReader::new(f))
            .with_context(|| "parse config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }
}
