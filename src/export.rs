//! Export: output types, the tiered fallback selector, download naming, and
//! the `Exporter` facade that ties the pipeline together.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::capture::{CaptureOpts, run_capture};
use crate::compositor::Compositor;
use crate::config::ExportConfig;
use crate::encode_ffmpeg::{
    FfmpegRecorder, RecorderConfig, ensure_parent_dir, flatten_to_opaque_rgba8,
    is_ffmpeg_available,
};
use crate::error::{BingkaiError, BingkaiResult};
use crate::media::{
    FfmpegFrameSource, MediaKind, VideoSourceInfo, decode_image_frame, probe_video,
    sniff_media_kind,
};
use crate::overlay::OverlayAsset;
use crate::progress::ProgressReporter;
use crate::transcode::{TranscodeConfig, transcode};

/// MIME type of a produced blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mime {
    ImagePng,
    VideoMp4,
    VideoWebm,
}

impl Mime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mime::ImagePng => "image/png",
            Mime::VideoMp4 => "video/mp4",
            Mime::VideoWebm => "video/webm",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Mime::ImagePng => "png",
            Mime::VideoMp4 => "mp4",
            Mime::VideoWebm => "webm",
        }
    }
}

impl std::fmt::Display for Mime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format a caller can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Mp4,
    Webm,
}

impl OutputFormat {
    pub fn mime(&self) -> Mime {
        match self {
            OutputFormat::Png => Mime::ImagePng,
            OutputFormat::Mp4 => Mime::VideoMp4,
            OutputFormat::Webm => Mime::VideoWebm,
        }
    }

    pub fn is_video(&self) -> bool {
        !matches!(self, OutputFormat::Png)
    }
}

/// Immutable result bytes plus their MIME type.
#[derive(Clone, Debug)]
pub struct OutputBlob {
    pub bytes: Vec<u8>,
    pub mime: Mime,
}

impl OutputBlob {
    pub fn new(bytes: Vec<u8>, mime: Mime) -> Self {
        Self { bytes, mime }
    }
}

/// Which path produced the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportTier {
    /// Whole-file batch transcode through the external encoder.
    External,
    /// Frame-by-frame capture through the recording sink.
    Realtime,
    /// Single-frame still image path.
    Still,
}

/// Informational note: the delivered container differs from the requested
/// one. Best-effort realtime output, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatNote {
    pub requested: Mime,
    pub delivered: Mime,
}

impl std::fmt::Display for FormatNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requested {} but the realtime recorder delivered {}",
            self.requested, self.delivered
        )
    }
}

/// `Some` only when the delivered container differs from the requested one.
pub fn derive_format_note(requested: OutputFormat, delivered: Mime) -> Option<FormatNote> {
    let requested = requested.mime();
    (delivered != requested).then_some(FormatNote {
        requested,
        delivered,
    })
}

#[derive(Clone, Debug)]
pub struct ExportOutcome {
    /// Where the download was written.
    pub path: PathBuf,
    pub blob: OutputBlob,
    pub tier: ExportTier,
    pub format_note: Option<FormatNote>,
}

#[derive(Clone, Debug)]
pub struct ExportRequest {
    pub source_path: PathBuf,
    /// `None` picks png for images and mp4 for videos.
    pub format: Option<OutputFormat>,
}

impl ExportRequest {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Fallback selector states, one transition per tier attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TierState {
    AttemptExternal,
    AttemptRealtime,
}

/// Run a video job through the tiered strategy.
///
/// External is attempted only when the adapter reports ready; any
/// fallback-classified failure there moves to the realtime tier. When both
/// tiers fail the causes are aggregated into one terminal error.
pub fn run_with_fallback<E, R>(
    external_ready: bool,
    progress: &mut ProgressReporter,
    external: E,
    realtime: R,
) -> BingkaiResult<(OutputBlob, ExportTier)>
where
    E: FnOnce(&mut ProgressReporter) -> BingkaiResult<OutputBlob>,
    R: FnOnce(&mut ProgressReporter) -> BingkaiResult<OutputBlob>,
{
    let mut state = if external_ready {
        TierState::AttemptExternal
    } else {
        tracing::info!("external encoder unavailable; using realtime capture");
        TierState::AttemptRealtime
    };

    let mut external = Some(external);
    let mut realtime = Some(realtime);
    let mut external_failure: Option<BingkaiError> = None;

    loop {
        match state {
            TierState::AttemptExternal => {
                let attempt = external.take().expect("external tier attempted once");
                match attempt(progress) {
                    Ok(blob) => return Ok((blob, ExportTier::External)),
                    Err(e) if e.triggers_fallback() => {
                        tracing::warn!("external encoder tier failed, falling back: {e}");
                        external_failure = Some(e);
                        state = TierState::AttemptRealtime;
                    }
                    Err(e) => return Err(e),
                }
            }
            TierState::AttemptRealtime => {
                let attempt = realtime.take().expect("realtime tier attempted once");
                return match attempt(progress) {
                    Ok(blob) => Ok((blob, ExportTier::Realtime)),
                    Err(realtime_err) => Err(BingkaiError::ExportFailed {
                        external: Box::new(external_failure.unwrap_or_else(|| {
                            BingkaiError::resource_load("encoder unavailable")
                        })),
                        realtime: Box::new(realtime_err),
                    }),
                };
            }
        }
    }
}

/// `<prefix>-<epoch-millis>.<ext>`.
pub fn download_file_name(prefix: &str, mime: Mime) -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{prefix}-{millis}.{}", mime.extension())
}

/// Write the blob into `out_dir` under a generated download name.
pub fn write_download(
    out_dir: &std::path::Path,
    prefix: &str,
    blob: &OutputBlob,
) -> BingkaiResult<PathBuf> {
    let path = out_dir.join(download_file_name(prefix, blob.mime));
    ensure_parent_dir(&path)?;
    use anyhow::Context as _;
    std::fs::write(&path, &blob.bytes)
        .with_context(|| format!("write download '{}'", path.display()))?;
    Ok(path)
}

/// Facade over the whole pipeline: owns the config, the loaded overlay, and
/// the single-job guard.
///
/// The render target and the encoder handle are mutated in place per job, so
/// jobs are mutually exclusive: a second `export` while one is active fails
/// immediately with [`BingkaiError::Busy`] and is never queued.
pub struct Exporter {
    cfg: ExportConfig,
    overlay: Option<OverlayAsset>,
    busy: AtomicBool,
}

impl Exporter {
    pub fn new(cfg: ExportConfig) -> BingkaiResult<Self> {
        cfg.validate()?;
        let overlay = match &cfg.overlay_path {
            Some(path) => Some(OverlayAsset::load(
                path,
                cfg.target_width,
                cfg.target_height,
            )?),
            None => {
                tracing::warn!("no overlay configured; exports will be source-only");
                None
            }
        };
        Ok(Self {
            cfg,
            overlay,
            busy: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.cfg
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn export(&self, request: &ExportRequest) -> BingkaiResult<ExportOutcome> {
        self.export_with_progress(request, |_| {})
    }

    /// Run one export job, reporting progress fractions to `observer`.
    ///
    /// Values delivered to the observer are monotonically non-decreasing and
    /// the final value is exactly 1.0, delivered once.
    pub fn export_with_progress(
        &self,
        request: &ExportRequest,
        observer: impl FnMut(f64) + 'static,
    ) -> BingkaiResult<ExportOutcome> {
        let _job = self.begin_job()?;
        let mut progress = ProgressReporter::new(observer);

        match sniff_media_kind(&request.source_path)? {
            MediaKind::Image => self.export_image(request, &mut progress),
            MediaKind::Video => self.export_video(request, &mut progress),
        }
    }

    fn begin_job(&self) -> BingkaiResult<JobGuard<'_>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(BingkaiError::Busy);
        }
        Ok(JobGuard(&self.busy))
    }

    fn new_compositor(&self) -> BingkaiResult<Compositor> {
        Compositor::new(
            self.cfg.target_width,
            self.cfg.target_height,
            self.cfg.background_rgba,
            self.overlay.clone(),
        )
    }

    fn export_image(
        &self,
        request: &ExportRequest,
        progress: &mut ProgressReporter,
    ) -> BingkaiResult<ExportOutcome> {
        let requested = request.format.unwrap_or(OutputFormat::Png);
        if requested != OutputFormat::Png {
            return Err(BingkaiError::validation(
                "still image sources export as png",
            ));
        }

        tracing::info!(source = %request.source_path.display(), "exporting still image");
        let frame = decode_image_frame(&request.source_path)?;
        progress.report(0.25);

        let mut compositor = self.new_compositor()?;
        let mut target = compositor.new_target()?;
        compositor.composite(&mut target, &frame)?;
        progress.report(0.75);

        let mut flat = vec![0u8; target.data().len()];
        flatten_to_opaque_rgba8(&mut flat, target.data(), self.cfg.background_rgba)?;

        let img = image::RgbaImage::from_raw(target.width(), target.height(), flat)
            .ok_or_else(|| BingkaiError::encode("composited frame has invalid size"))?;
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| BingkaiError::encode(format!("png encode failed: {e}")))?;

        let blob = OutputBlob::new(bytes, Mime::ImagePng);
        progress.finish();

        let path = write_download(&self.cfg.out_dir, &self.cfg.file_prefix, &blob)?;
        tracing::info!(path = %path.display(), "image export complete");
        Ok(ExportOutcome {
            path,
            blob,
            tier: ExportTier::Still,
            format_note: None,
        })
    }

    fn export_video(
        &self,
        request: &ExportRequest,
        progress: &mut ProgressReporter,
    ) -> BingkaiResult<ExportOutcome> {
        let requested = request.format.unwrap_or(OutputFormat::Mp4);
        if !requested.is_video() {
            return Err(BingkaiError::validation(
                "video sources export as mp4 or webm",
            ));
        }

        tracing::info!(source = %request.source_path.display(), "probing video source");
        let info = probe_video(&request.source_path)?;
        if !(info.duration_sec > 0.0) {
            return Err(BingkaiError::playback(
                "source reports no duration; cannot drive the export",
            ));
        }

        let (blob, tier) = run_with_fallback(
            is_ffmpeg_available(),
            progress,
            |p| self.run_external_tier(&info, requested, p),
            |p| self.run_realtime_tier(&info, p),
        )?;

        let format_note = derive_format_note(requested, blob.mime);
        if let Some(note) = &format_note {
            tracing::info!("{note}");
        }

        progress.finish();
        let path = write_download(&self.cfg.out_dir, &self.cfg.file_prefix, &blob)?;
        tracing::info!(path = %path.display(), ?tier, "video export complete");
        Ok(ExportOutcome {
            path,
            blob,
            tier,
            format_note,
        })
    }

    fn run_external_tier(
        &self,
        info: &VideoSourceInfo,
        requested: OutputFormat,
        progress: &mut ProgressReporter,
    ) -> BingkaiResult<OutputBlob> {
        tracing::info!("exporting via external encoder");
        let cfg = TranscodeConfig {
            width: self.cfg.target_width,
            height: self.cfg.target_height,
            format: requested,
            preset: self.cfg.video_preset.clone(),
            crf: self.cfg.video_crf,
            audio_bitrate_kbps: self.cfg.audio_bitrate_kbps,
        };
        transcode(info, self.cfg.overlay_path.as_deref(), &cfg, progress)
    }

    fn run_realtime_tier(
        &self,
        info: &VideoSourceInfo,
        progress: &mut ProgressReporter,
    ) -> BingkaiResult<OutputBlob> {
        tracing::info!("exporting via realtime capture");
        let fps = source_fps_or_fallback(info, self.cfg.fallback_fps);

        match self.capture_once(info, fps, info.has_audio, progress) {
            Ok(blob) => Ok(blob),
            Err(e) if retry_without_audio(&e, info.has_audio) => {
                // A broken audio stream can fail the whole encode even though
                // the video content is still exportable.
                tracing::warn!("capture with audio failed, retrying video only: {e}");
                self.capture_once(info, fps, false, progress)
            }
            Err(e) => Err(e),
        }
    }

    fn capture_once(
        &self,
        info: &VideoSourceInfo,
        fps: u32,
        with_audio: bool,
        progress: &mut ProgressReporter,
    ) -> BingkaiResult<OutputBlob> {
        let mut compositor = self.new_compositor()?;
        let mut target = compositor.new_target()?;
        let mut source = FfmpegFrameSource::open(info)?;

        let mut sink = FfmpegRecorder::spawn(
            RecorderConfig {
                width: self.cfg.target_width,
                height: self.cfg.target_height,
                fps,
                audio_source: with_audio.then(|| info.source_path.clone()),
                audio_bitrate_kbps: self.cfg.audio_bitrate_kbps,
            },
            self.cfg.background_rgba,
        )?;

        let opts = CaptureOpts {
            fps,
            duration_sec: info.duration_sec,
            timeout_buffer_sec: self.cfg.capture_timeout_buffer_sec,
        };
        let (blob, stats) = run_capture(
            &mut source,
            &mut compositor,
            &mut target,
            &mut sink,
            &opts,
            progress,
        )?;
        tracing::info!(
            frames = stats.frames_written,
            timed_out = stats.timed_out,
            "realtime capture finished"
        );
        Ok(blob)
    }
}

/// Whether a failed capture run should be repeated without the audio mapping.
/// Only an encode failure with audio mapped plausibly traces back to the
/// audio routing; everything else would fail again identically.
fn retry_without_audio(err: &BingkaiError, audio_mapped: bool) -> bool {
    audio_mapped && matches!(err, BingkaiError::Encode(_))
}

fn source_fps_or_fallback(info: &VideoSourceInfo, fallback: u32) -> u32 {
    let fps = info.source_fps().round();
    if fps >= 1.0 && fps <= 240.0 {
        fps as u32
    } else {
        fallback
    }
}

struct JobGuard<'a>(&'a AtomicBool);

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
