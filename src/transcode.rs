//! External encoder tier: one whole-file ffmpeg pass.
//!
//! The filter graph reproduces the compositor's geometry on the encoder side:
//! scale-to-fill into the target canvas, center-crop the excess, then lay the
//! overlay across the full canvas. The original audio track is carried over
//! when the source has one.

use std::io::{BufRead as _, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::encode_ffmpeg::{TempFileGuard, is_ffmpeg_available};
use crate::error::{BingkaiError, BingkaiResult};
use crate::export::{OutputBlob, OutputFormat};
use crate::media::VideoSourceInfo;
use crate::progress::ProgressReporter;

#[derive(Clone, Debug)]
pub struct TranscodeConfig {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    /// x264 speed/quality tradeoff, e.g. "veryfast".
    pub preset: String,
    pub crf: u32,
    pub audio_bitrate_kbps: u32,
}

impl TranscodeConfig {
    pub fn validate(&self) -> BingkaiResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(BingkaiError::validation(
                "transcode width/height must be non-zero",
            ));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(BingkaiError::validation(
                "transcode width/height must be even (required for yuv420p output)",
            ));
        }
        if self.format == OutputFormat::Png {
            return Err(BingkaiError::validation(
                "transcode output format must be a video container",
            ));
        }
        Ok(())
    }
}

/// Run the batch transcode. Progress is driven by ffmpeg's own
/// `-progress pipe:1` signal against the probed duration.
pub fn transcode(
    source: &VideoSourceInfo,
    overlay_path: Option<&Path>,
    cfg: &TranscodeConfig,
    progress: &mut ProgressReporter,
) -> BingkaiResult<OutputBlob> {
    cfg.validate()?;

    if !is_ffmpeg_available() {
        return Err(BingkaiError::resource_load(
            "encoder unavailable: ffmpeg was not found on PATH",
        ));
    }

    let mime = cfg.format.mime();
    let out_tmp = TempFileGuard::fresh("transcode", mime.extension());

    let mut cmd = Command::new("ffmpeg");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    cmd.args(["-y", "-loglevel", "error", "-progress", "pipe:1"]);
    cmd.arg("-i").arg(&source.source_path);
    if let Some(overlay) = overlay_path {
        cmd.arg("-i").arg(overlay);
    }

    cmd.arg("-filter_complex")
        .arg(build_filter_graph(cfg.width, cfg.height, overlay_path.is_some()));
    cmd.args(["-map", "[vout]", "-map", "0:a?"]);

    match cfg.format {
        OutputFormat::Mp4 => {
            cmd.args([
                "-c:v",
                "libx264",
                "-preset",
                &cfg.preset,
                "-crf",
                &cfg.crf.to_string(),
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                &format!("{}k", cfg.audio_bitrate_kbps),
                "-movflags",
                "+faststart",
                "-f",
                "mp4",
            ]);
        }
        OutputFormat::Webm => {
            cmd.args([
                "-c:v",
                "libvpx-vp9",
                "-b:v",
                "0",
                "-crf",
                &cfg.crf.to_string(),
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "libopus",
                "-b:a",
                &format!("{}k", cfg.audio_bitrate_kbps),
                "-f",
                "webm",
            ]);
        }
        OutputFormat::Png => unreachable!("rejected by validate"),
    }
    cmd.arg(out_tmp.path());

    let mut child = cmd
        .spawn()
        .map_err(|e| BingkaiError::encode(format!("failed to spawn ffmpeg transcode: {e}")))?;

    if let Some(stdout) = child.stdout.take() {
        let duration = source.duration_sec;
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if let Some(secs) = parse_progress_line(&line)
                && duration > 0.0
            {
                progress.report((secs / duration).min(0.99));
            }
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|e| BingkaiError::encode(format!("failed to wait for ffmpeg transcode: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BingkaiError::encode(format!(
            "processing failed: ffmpeg exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let bytes = std::fs::read(out_tmp.path())
        .map_err(|e| BingkaiError::encode(format!("failed to read transcoded output: {e}")))?;

    progress.finish();
    Ok(OutputBlob::new(bytes, mime))
}

/// Scale-to-fill + center-crop + overlay graph, labeled `[vout]`.
fn build_filter_graph(width: u32, height: u32, has_overlay: bool) -> String {
    let base = format!(
        "[0:v]scale={width}:{height}:force_original_aspect_ratio=increase,\
         crop={width}:{height},setsar=1"
    );
    if has_overlay {
        format!(
            "{base}[base];[1:v]scale={width}:{height}[ovl];\
             [base][ovl]overlay=0:0:format=auto[vout]"
        )
    } else {
        format!("{base}[vout]")
    }
}

/// Parse one `-progress pipe:1` key=value line into elapsed output seconds.
///
/// ffmpeg reports `out_time_us` (and, for historical reasons, `out_time_ms`
/// carrying the same microsecond value).
fn parse_progress_line(line: &str) -> Option<f64> {
    let micros = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?;
    let micros = micros.trim().parse::<i64>().ok()?;
    if micros < 0 {
        return None;
    }
    Some(micros as f64 / 1_000_000.0)
}
