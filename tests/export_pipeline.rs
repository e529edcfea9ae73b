use std::path::Path;
use std::process::Command;

use bingkai::{
    BingkaiError, CaptureOpts, Compositor, ExportConfig, ExportRequest, ExportTier, Exporter,
    MemoryRecorder, Mime, OutputBlob, OutputFormat, ProgressReporter, SourceFrame, run_capture,
    run_with_fallback,
};

fn ffmpeg_tools_available() -> bool {
    let ffmpeg_ok = Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    let ffprobe_ok = Command::new("ffprobe")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    ffmpeg_ok && ffprobe_ok
}

fn write_png(path: &Path, width: u32, height: u32, rgba: [u8; 4]) {
    let mut img = image::RgbaImage::new(width, height);
    for px in img.pixels_mut() {
        *px = image::Rgba(rgba);
    }
    img.save(path).unwrap();
}

fn synth_video(path: &Path) {
    let status = Command::new("ffmpeg")
        .args([
            "-v",
            "error",
            "-y",
            "-f",
            "lavfi",
            "-i",
            "testsrc=size=64x64:rate=30",
            "-f",
            "lavfi",
            "-i",
            "sine=frequency=440:sample_rate=48000",
            "-t",
            "1",
            "-pix_fmt",
            "yuv420p",
            "-c:v",
            "libx264",
            "-c:a",
            "aac",
        ])
        .arg(path)
        .status()
        .unwrap();
    assert!(status.success(), "ffmpeg failed creating test clip");
}

struct SolidSource {
    frames_left: u32,
    frame: SourceFrame,
}

impl bingkai::FrameSource for SolidSource {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, BingkaiError> {
        if self.frames_left == 0 {
            return Ok(None);
        }
        self.frames_left -= 1;
        Ok(Some(self.frame.clone()))
    }
}

#[test]
fn image_export_produces_reels_sized_png() {
    let dir = tempfile::tempdir().unwrap();

    let source_path = dir.path().join("photo.png");
    write_png(&source_path, 640, 480, [10, 200, 30, 255]);

    let overlay_path = dir.path().join("overlay.png");
    // Fully transparent overlay so the source shows through everywhere.
    write_png(&overlay_path, 1080, 1920, [0, 0, 0, 0]);

    let cfg = ExportConfig {
        overlay_path: Some(overlay_path),
        out_dir: dir.path().to_path_buf(),
        ..ExportConfig::default()
    };
    let exporter = Exporter::new(cfg).unwrap();

    let outcome = exporter.export(&ExportRequest::new(&source_path)).unwrap();
    assert_eq!(outcome.tier, ExportTier::Still);
    assert_eq!(outcome.blob.mime, Mime::ImagePng);
    assert!(outcome.format_note.is_none());
    assert!(outcome.path.exists());

    let decoded = image::open(&outcome.path).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (1080, 1920));
    // 640x480 fills the height, so the horizontal center carries source color.
    let center = decoded.get_pixel(540, 960);
    assert_eq!(center.0, [10, 200, 30, 255]);
}

#[test]
fn download_names_follow_prefix_and_extension() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("photo.png");
    write_png(&source_path, 8, 8, [255, 255, 255, 255]);

    let cfg = ExportConfig {
        out_dir: dir.path().to_path_buf(),
        file_prefix: "frame".to_string(),
        ..ExportConfig::default()
    };
    let exporter = Exporter::new(cfg).unwrap();
    let outcome = exporter.export(&ExportRequest::new(&source_path)).unwrap();

    let name = outcome.path.file_name().unwrap().to_string_lossy();
    let digits = name
        .strip_prefix("frame-")
        .and_then(|s| s.strip_suffix(".png"))
        .unwrap();
    assert!(!digits.is_empty());
    assert!(digits.chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn image_export_rejects_video_format_request() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("photo.png");
    write_png(&source_path, 8, 8, [255, 255, 255, 255]);

    let cfg = ExportConfig {
        out_dir: dir.path().to_path_buf(),
        ..ExportConfig::default()
    };
    let exporter = Exporter::new(cfg).unwrap();
    let err = exporter
        .export(&ExportRequest::new(&source_path).with_format(OutputFormat::Mp4))
        .unwrap_err();
    assert!(matches!(err, BingkaiError::Validation(_)));
}

#[test]
fn capture_into_memory_sink_reports_monotonic_progress() {
    let mut compositor = Compositor::new(64, 64, [0, 0, 0, 255], None).unwrap();
    let mut target = compositor.new_target().unwrap();

    let frame = SourceFrame::new(32, 32, vec![128u8; 32 * 32 * 4]).unwrap();
    let mut source = SolidSource {
        frames_left: 100,
        frame,
    };
    let mut sink = MemoryRecorder::default();

    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let seen_in = seen.clone();
    let mut progress = ProgressReporter::new(move |f| seen_in.borrow_mut().push(f));

    let opts = CaptureOpts {
        fps: 10,
        duration_sec: 1.0,
        timeout_buffer_sec: 10.0,
    };
    let (blob, stats) = run_capture(
        &mut source,
        &mut compositor,
        &mut target,
        &mut sink,
        &opts,
        &mut progress,
    )
    .unwrap();

    assert_eq!(stats.frames_written, 10);
    assert!(stats.reached_end);
    assert!(!stats.timed_out);
    assert_eq!(blob.mime, Mime::VideoWebm);
    assert_eq!(sink.frames_written, 10);

    let seen = seen.borrow();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*seen.last().unwrap(), 1.0);
    assert_eq!(seen.iter().filter(|&&f| f == 1.0).count(), 1);
}

#[test]
fn fallback_delivers_realtime_output_when_external_fails() {
    let mut progress = ProgressReporter::sink();
    let (blob, tier) = run_with_fallback(
        true,
        &mut progress,
        |_| Err(BingkaiError::encode("processing failed")),
        |_| Ok(OutputBlob::new(vec![7u8; 3], Mime::VideoWebm)),
    )
    .unwrap();
    assert_eq!(tier, ExportTier::Realtime);
    assert_eq!(blob.mime, Mime::VideoWebm);
}

#[test]
fn video_export_end_to_end_with_overlay() {
    if !ffmpeg_tools_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();

    let clip_path = dir.path().join("clip.mp4");
    synth_video(&clip_path);

    let overlay_path = dir.path().join("overlay.png");
    write_png(&overlay_path, 1080, 1920, [0, 0, 0, 0]);

    let cfg = ExportConfig {
        overlay_path: Some(overlay_path),
        out_dir: dir.path().to_path_buf(),
        ..ExportConfig::default()
    };
    let exporter = Exporter::new(cfg).unwrap();

    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let seen_in = seen.clone();
    let outcome = exporter
        .export_with_progress(&ExportRequest::new(&clip_path), move |f| {
            seen_in.borrow_mut().push(f)
        })
        .unwrap();

    assert_eq!(outcome.blob.mime, Mime::VideoMp4);
    assert_eq!(outcome.tier, ExportTier::External);
    assert!(outcome.format_note.is_none());
    assert!(outcome.path.exists());
    assert!(std::fs::metadata(&outcome.path).unwrap().len() > 0);

    let seen = seen.borrow();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*seen.last().unwrap(), 1.0);
    assert_eq!(seen.iter().filter(|&&f| f == 1.0).count(), 1);
}

#[test]
fn realtime_tier_records_webm_from_decoded_frames() {
    if !ffmpeg_tools_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();

    let clip_path = dir.path().join("clip.mp4");
    synth_video(&clip_path);

    let cfg = ExportConfig {
        out_dir: dir.path().to_path_buf(),
        // Small canvas keeps the per-frame capture cheap.
        target_width: 108,
        target_height: 192,
        ..ExportConfig::default()
    };
    let exporter = Exporter::new(cfg).unwrap();

    let info = bingkai::probe_video(&clip_path).unwrap();
    let mut progress = ProgressReporter::sink();
    let (blob, tier) = run_with_fallback(
        false,
        &mut progress,
        |_| unreachable!("external tier is not ready"),
        |p| exporter_realtime(&exporter, &info, p),
    )
    .unwrap();
    assert_eq!(tier, ExportTier::Realtime);
    assert_eq!(blob.mime, Mime::VideoWebm);
    assert!(!blob.bytes.is_empty());
}

// The realtime tier is private on Exporter; drive the same path through the
// public capture building blocks.
fn exporter_realtime(
    exporter: &Exporter,
    info: &bingkai::VideoSourceInfo,
    progress: &mut ProgressReporter,
) -> Result<OutputBlob, BingkaiError> {
    use bingkai::encode_ffmpeg::{FfmpegRecorder, RecorderConfig};

    let cfg = exporter.config();
    let mut compositor = Compositor::new(
        cfg.target_width,
        cfg.target_height,
        cfg.background_rgba,
        None,
    )?;
    let mut target = compositor.new_target()?;
    let mut source = bingkai::FfmpegFrameSource::open(info)?;
    let mut sink = FfmpegRecorder::spawn(
        RecorderConfig {
            width: cfg.target_width,
            height: cfg.target_height,
            fps: 30,
            audio_source: None,
            audio_bitrate_kbps: cfg.audio_bitrate_kbps,
        },
        cfg.background_rgba,
    )?;
    let opts = CaptureOpts {
        fps: 30,
        duration_sec: info.duration_sec,
        timeout_buffer_sec: cfg.capture_timeout_buffer_sec,
    };
    let (blob, _) = run_capture(
        &mut source,
        &mut compositor,
        &mut target,
        &mut sink,
        &opts,
        progress,
    )?;
    Ok(blob)
}
