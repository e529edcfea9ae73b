#![forbid(unsafe_code)]

//! Fixed-frame overlay compositing and reels-format export.
//!
//! Source photos and videos are scaled crop-to-fill into a 1080x1920 canvas,
//! the bingkai overlay is composited on top of every frame, and the result is
//! exported as a downloadable file. Video jobs run through a tiered strategy:
//! a whole-file pass through the external encoder when it is available, with
//! a frame-by-frame capture pipeline as the fallback.

pub mod capture;
pub mod compositor;
pub mod config;
pub mod encode_ffmpeg;
pub mod error;
pub mod export;
pub mod geometry;
pub mod media;
pub mod overlay;
pub mod progress;
pub mod transcode;

pub use capture::{CaptureOpts, CaptureStats, run_capture};
pub use compositor::{Compositor, REELS_HEIGHT, REELS_WIDTH, RenderTarget};
pub use config::ExportConfig;
pub use encode_ffmpeg::{FfmpegRecorder, MemoryRecorder, RecordSink, is_ffmpeg_available};
pub use error::{BingkaiError, BingkaiResult};
pub use export::{
    ExportOutcome, ExportRequest, ExportTier, Exporter, FormatNote, Mime, OutputBlob,
    OutputFormat, derive_format_note, run_with_fallback,
};
pub use geometry::FillGeometry;
pub use media::{
    FfmpegFrameSource, FrameSource, MediaKind, SourceFrame, VideoSourceInfo, probe_video,
    sniff_media_kind,
};
pub use overlay::OverlayAsset;
pub use progress::ProgressReporter;
pub use transcode::{TranscodeConfig, transcode};
