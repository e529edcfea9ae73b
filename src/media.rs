//! Source media handling: kind sniffing, ffprobe metadata, and streaming
//! frame decode.
//!
//! Video decode shells out to the system `ffmpeg`/`ffprobe` binaries rather
//! than linking native FFmpeg libraries, so the crate builds without FFmpeg
//! dev headers.

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::error::{BingkaiError, BingkaiResult};
use crate::overlay::premultiply_rgba8_in_place;

/// What a user handed us: a still image or a playable video.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// One decoded frame: premultiplied RGBA8, row-major.
#[derive(Clone, Debug)]
pub struct SourceFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl SourceFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> BingkaiResult<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return Err(BingkaiError::validation(
                "source frame data length must be width*height*4",
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }
}

#[derive(Clone, Debug)]
pub struct VideoSourceInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub duration_sec: f64,
    pub has_audio: bool,
}

impl VideoSourceInfo {
    pub fn source_fps(&self) -> f64 {
        if self.fps_den == 0 {
            0.0
        } else {
            f64::from(self.fps_num) / f64::from(self.fps_den)
        }
    }
}

/// Decide whether a path is a still image or a video.
///
/// Anything the `image` crate recognizes by magic bytes is an image; the rest
/// is handed to ffprobe as video.
pub fn sniff_media_kind(path: &Path) -> BingkaiResult<MediaKind> {
    let reader = image::ImageReader::open(path)
        .map_err(|e| {
            BingkaiError::resource_load(format!("failed to open '{}': {e}", path.display()))
        })?
        .with_guessed_format()
        .map_err(|e| {
            BingkaiError::resource_load(format!("failed to sniff '{}': {e}", path.display()))
        })?;

    if reader.format().is_some() {
        Ok(MediaKind::Image)
    } else {
        Ok(MediaKind::Video)
    }
}

/// Decode a still image into a premultiplied RGBA8 frame.
pub fn decode_image_frame(path: &Path) -> BingkaiResult<SourceFrame> {
    let bytes = std::fs::read(path).map_err(|e| {
        BingkaiError::resource_load(format!("failed to read '{}': {e}", path.display()))
    })?;
    let dyn_img = image::load_from_memory(&bytes).map_err(|e| {
        BingkaiError::playback(format!("failed to decode image '{}': {e}", path.display()))
    })?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut data = rgba.into_raw();
    premultiply_rgba8_in_place(&mut data);
    SourceFrame::new(width, height, data)
}

pub fn probe_video(source_path: &Path) -> BingkaiResult<VideoSourceInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        r_frame_rate: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| BingkaiError::resource_load(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(BingkaiError::playback(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| BingkaiError::playback(format!("ffprobe json parse failed: {e}")))?;
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| BingkaiError::playback("no video stream found"))?;
    let width = video_stream
        .width
        .ok_or_else(|| BingkaiError::playback("missing video width from ffprobe"))?;
    let height = video_stream
        .height
        .ok_or_else(|| BingkaiError::playback("missing video height from ffprobe"))?;

    let (fps_num, fps_den) = parse_ff_ratio(video_stream.r_frame_rate.as_deref().unwrap_or("0/1"))
        .ok_or_else(|| BingkaiError::playback("invalid video r_frame_rate"))?;
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(VideoSourceInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        fps_num,
        fps_den,
        duration_sec,
        has_audio,
    })
}

/// Pull-based stream of decoded frames, in playback order.
///
/// The capture pipeline is written against this trait so it can be exercised
/// with synthetic sources.
pub trait FrameSource {
    /// The next frame, or `None` once the source has ended.
    fn next_frame(&mut self) -> BingkaiResult<Option<SourceFrame>>;
}

/// Streams RGBA8 frames out of an ffmpeg child process over a pipe.
pub struct FfmpegFrameSource {
    info: VideoSourceInfo,
    child: Child,
    stdout: Option<ChildStdout>,
    frame_len: usize,
}

impl FfmpegFrameSource {
    pub fn open(info: &VideoSourceInfo) -> BingkaiResult<Self> {
        let frame_len = info.width as usize * info.height as usize * 4;
        if frame_len == 0 {
            return Err(BingkaiError::playback(
                "source frame size is zero (invalid source dimensions)",
            ));
        }

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(&info.source_path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                BingkaiError::playback(format!("failed to spawn ffmpeg for video decode: {e}"))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            BingkaiError::playback("failed to open ffmpeg stdout (unexpected)")
        })?;

        Ok(Self {
            info: info.clone(),
            child,
            stdout: Some(stdout),
            frame_len,
        })
    }

    pub fn info(&self) -> &VideoSourceInfo {
        &self.info
    }
}

impl FrameSource for FfmpegFrameSource {
    fn next_frame(&mut self) -> BingkaiResult<Option<SourceFrame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0usize;
        while filled < buf.len() {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(BingkaiError::playback(format!(
                        "failed to read decoded frame: {e}"
                    )));
                }
            }
        }

        if filled == 0 {
            // Clean end of stream.
            self.stdout = None;
            let _ = self.child.wait();
            return Ok(None);
        }
        if filled < buf.len() {
            return Err(BingkaiError::playback(format!(
                "truncated frame from decoder: got {filled} of {} bytes",
                buf.len()
            )));
        }

        // Decoded video is opaque; rgba from ffmpeg carries alpha=255, so the
        // buffer is already valid premultiplied data.
        SourceFrame::new(self.info.width, self.info.height, buf).map(Some)
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if self.stdout.take().is_some() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.split('/');
    let a = parts.next()?.parse::<u32>().ok()?;
    let b = parts.next()?.parse::<u32>().ok()?;
    if b == 0 {
        return None;
    }
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_parsing() {
        assert_eq!(parse_ff_ratio("30000/1001"), Some((30000, 1001)));
        assert_eq!(parse_ff_ratio("25/1"), Some((25, 1)));
        assert_eq!(parse_ff_ratio("0/0"), None);
        assert_eq!(parse_ff_ratio("abc"), None);
    }

    #[test]
    fn source_fps_handles_zero_den() {
        let info = VideoSourceInfo {
            source_path: PathBuf::from("a.mp4"),
            width: 10,
            height: 10,
            fps_num: 30,
            fps_den: 0,
            duration_sec: 1.0,
            has_audio: false,
        };
        assert_eq!(info.source_fps(), 0.0);
    }

    #[test]
    fn source_frame_length_is_validated() {
        assert!(SourceFrame::new(2, 2, vec![0u8; 16]).is_ok());
        assert!(SourceFrame::new(2, 2, vec![0u8; 15]).is_err());
    }

    #[test]
    fn sniff_recognizes_png_as_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        let img = image::RgbaImage::from_raw(2, 2, vec![255u8; 16]).unwrap();
        img.save(&path).unwrap();
        assert_eq!(sniff_media_kind(&path).unwrap(), MediaKind::Image);
    }

    #[test]
    fn sniff_treats_unknown_bytes_as_video() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42not-a-real-file").unwrap();
        assert_eq!(sniff_media_kind(&path).unwrap(), MediaKind::Video);
    }
}
