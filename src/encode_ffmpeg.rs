//! ffmpeg plumbing shared by both export tiers, plus the recording sink used
//! by the real-time capture path.
//!
//! We intentionally use the system `ffmpeg` binary rather than `ffmpeg-next`
//! to avoid native FFmpeg dev header/lib requirements.

use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::OnceLock;

use crate::compositor::RenderTarget;
use crate::error::{BingkaiError, BingkaiResult};
use crate::export::{Mime, OutputBlob};

static FFMPEG_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Whether the encoder binary is ready for use.
///
/// Probed once per process; concurrent callers share the single in-flight
/// probe and every later call is a cached read.
pub fn is_ffmpeg_available() -> bool {
    *FFMPEG_AVAILABLE.get_or_init(|| {
        let ok = Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !ok {
            tracing::warn!("ffmpeg not found on PATH; external encoder tier is unavailable");
        }
        ok
    })
}

pub fn ensure_parent_dir(path: &Path) -> BingkaiResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Deletes the wrapped path on drop. Used for scratch encoder outputs.
pub(crate) struct TempFileGuard(pub Option<PathBuf>);

impl TempFileGuard {
    pub(crate) fn fresh(tag: &str, ext: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "bingkai_{tag}_{}_{}.{ext}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ));
        Self(Some(path))
    }

    pub(crate) fn path(&self) -> &Path {
        self.0.as_deref().expect("temp file guard already consumed")
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A sink that accumulates composited frames and finalizes them into an
/// output blob. The capture pipeline is written against this trait so it can
/// be exercised without an encoder on PATH.
pub trait RecordSink {
    fn write_frame(&mut self, frame: &RenderTarget) -> BingkaiResult<()>;

    /// Flush buffered data and produce the immutable output blob. Called at
    /// most once.
    fn finish(&mut self) -> BingkaiResult<OutputBlob>;
}

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Original source file to pull the audio track from, when it has one.
    pub audio_source: Option<PathBuf>,
    pub audio_bitrate_kbps: u32,
}

impl RecorderConfig {
    pub fn validate(&self) -> BingkaiResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(BingkaiError::validation(
                "recorder width/height must be non-zero",
            ));
        }
        if self.fps == 0 {
            return Err(BingkaiError::validation("recorder fps must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // yuv420p output requires even dimensions.
            return Err(BingkaiError::validation(
                "recorder width/height must be even (required for yuv420p output)",
            ));
        }
        Ok(())
    }
}

/// Real-time recording sink: raw RGBA frames over stdin into a VP9/Opus WebM.
///
/// WebM is the one container this sink produces; when the caller asked for a
/// different one the fallback selector surfaces a format note.
pub struct FfmpegRecorder {
    cfg: RecorderConfig,
    bg_rgba: [u8; 4],
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    out_tmp: TempFileGuard,
    scratch: Vec<u8>,
}

impl FfmpegRecorder {
    pub fn spawn(cfg: RecorderConfig, bg_rgba: [u8; 4]) -> BingkaiResult<Self> {
        cfg.validate()?;

        if !is_ffmpeg_available() {
            return Err(BingkaiError::resource_load(
                "encoder unavailable: ffmpeg was not found on PATH",
            ));
        }

        let out_tmp = TempFileGuard::fresh("capture", "webm");

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
        ]);

        if let Some(audio) = &cfg.audio_source {
            cmd.arg("-i").arg(audio);
            // The trailing '?' keeps the mapping optional: a source without a
            // usable audio stream degrades to video-only instead of failing.
            cmd.args(["-map", "0:v", "-map", "1:a?"]);
            cmd.args([
                "-c:a",
                "libopus",
                "-b:a",
                &format!("{}k", cfg.audio_bitrate_kbps),
                "-shortest",
            ]);
        } else {
            cmd.arg("-an");
        }

        cmd.args([
            "-c:v",
            "libvpx-vp9",
            "-deadline",
            "realtime",
            "-cpu-used",
            "8",
            "-row-mt",
            "1",
            "-pix_fmt",
            "yuv420p",
            "-f",
            "webm",
        ])
        .arg(out_tmp.path());

        let mut child = cmd
            .spawn()
            .map_err(|e| BingkaiError::encode(format!("failed to spawn ffmpeg recorder: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BingkaiError::encode("failed to open ffmpeg stdin (unexpected)"))?;

        Ok(Self {
            scratch: vec![0u8; (cfg.width * cfg.height * 4) as usize],
            cfg,
            bg_rgba,
            child: Some(child),
            stdin: Some(stdin),
            out_tmp,
        })
    }
}

impl RecordSink for FfmpegRecorder {
    fn write_frame(&mut self, frame: &RenderTarget) -> BingkaiResult<()> {
        if frame.width() != self.cfg.width || frame.height() != self.cfg.height {
            return Err(BingkaiError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                self.cfg.width,
                self.cfg.height
            )));
        }

        flatten_to_opaque_rgba8(&mut self.scratch, frame.data(), self.bg_rgba)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(BingkaiError::encode("recorder is already finalized"));
        };

        use std::io::Write as _;
        stdin.write_all(&self.scratch).map_err(|e| {
            BingkaiError::encode(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;

        Ok(())
    }

    fn finish(&mut self) -> BingkaiResult<OutputBlob> {
        drop(self.stdin.take());

        let Some(child) = self.child.take() else {
            return Err(BingkaiError::encode("recorder is already finalized"));
        };

        let output = child
            .wait_with_output()
            .map_err(|e| BingkaiError::encode(format!("failed to wait for ffmpeg recorder: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BingkaiError::encode(format!(
                "ffmpeg recorder exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let bytes = std::fs::read(self.out_tmp.path())
            .map_err(|e| BingkaiError::encode(format!("failed to read recorded output: {e}")))?;

        Ok(OutputBlob::new(bytes, Mime::VideoWebm))
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// In-memory sink: counts frames and finishes into a synthetic WebM-typed
/// blob. Lets the capture pipeline and fallback selector run in tests without
/// an encoder on PATH.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    pub frames_written: u64,
    pub finished: bool,
}

impl RecordSink for MemoryRecorder {
    fn write_frame(&mut self, _frame: &RenderTarget) -> BingkaiResult<()> {
        if self.finished {
            return Err(BingkaiError::encode("recorder is already finalized"));
        }
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> BingkaiResult<OutputBlob> {
        if self.finished {
            return Err(BingkaiError::encode("recorder is already finalized"));
        }
        self.finished = true;
        Ok(OutputBlob::new(
            self.frames_written.to_le_bytes().to_vec(),
            Mime::VideoWebm,
        ))
    }
}

/// Flatten premultiplied RGBA over an opaque background color, producing the
/// straight opaque RGBA the raw pipe expects.
pub(crate) fn flatten_to_opaque_rgba8(
    dst: &mut [u8],
    src: &[u8],
    bg_rgba: [u8; 4],
) -> BingkaiResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(BingkaiError::validation(
            "flatten_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    let bg_r = bg_rgba[0] as u16;
    let bg_g = bg_rgba[1] as u16;
    let bg_b = bg_rgba[2] as u16;

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = s[3] as u16;
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }

        let inv = 255u16 - a;
        d[0] = (s[0] as u16 + mul_div255(bg_r, inv)).min(255) as u8;
        d[1] = (s[1] as u16 + mul_div255(bg_g, inv)).min(255) as u8;
        d[2] = (s[2] as u16 + mul_div255(bg_b, inv)).min(255) as u8;
        d[3] = 255;
    }

    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_config_validation_catches_bad_values() {
        let base = RecorderConfig {
            width: 10,
            height: 10,
            fps: 30,
            audio_source: None,
            audio_bitrate_kbps: 128,
        };

        assert!(
            RecorderConfig {
                width: 0,
                ..base.clone()
            }
            .validate()
            .is_err()
        );
        assert!(
            RecorderConfig {
                width: 11,
                ..base.clone()
            }
            .validate()
            .is_err()
        );
        assert!(
            RecorderConfig {
                fps: 0,
                ..base.clone()
            }
            .validate()
            .is_err()
        );
        assert!(base.validate().is_ok());
    }

    #[test]
    fn flatten_premul_over_black_produces_expected_rgb() {
        // Premultiplied red @ 50% alpha => rgb stays 128,0,0 over black.
        let src = vec![128u8, 0u8, 0u8, 128u8];
        let mut dst = vec![0u8; 4];
        flatten_to_opaque_rgba8(&mut dst, &src, [0, 0, 0, 255]).unwrap();
        assert_eq!(dst, vec![128u8, 0u8, 0u8, 255u8]);
    }

    #[test]
    fn flatten_premul_over_white_adds_background() {
        let src = vec![128u8, 0u8, 0u8, 128u8];
        let mut dst = vec![0u8; 4];
        flatten_to_opaque_rgba8(&mut dst, &src, [255, 255, 255, 255]).unwrap();
        assert_eq!(dst[0], 255);
        assert_eq!(dst[1], 127);
        assert_eq!(dst[3], 255);
    }

    #[test]
    fn memory_recorder_counts_frames_and_finalizes_once() {
        let mut rec = MemoryRecorder::default();
        let target = RenderTarget::new(2, 2).unwrap();
        rec.write_frame(&target).unwrap();
        rec.write_frame(&target).unwrap();
        let blob = rec.finish().unwrap();
        assert_eq!(blob.mime, Mime::VideoWebm);
        assert!(rec.finish().is_err());
        assert!(rec.write_frame(&target).is_err());
    }

    #[test]
    fn temp_file_guard_removes_file_on_drop() {
        let guard = TempFileGuard::fresh("test", "bin");
        let path = guard.path().to_path_buf();
        std::fs::write(&path, b"x").unwrap();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }
}
