//! Real-time capture tier: drive the source through its duration, composite
//! every frame, and feed the render target into a recording sink.
//!
//! Frames are processed strictly in playback order. A wall-clock guard bounds
//! the whole run to roughly the source duration plus a fixed buffer; hitting
//! it finalizes whatever was captured instead of failing the job.

use std::time::{Duration, Instant};

use crate::compositor::{Compositor, RenderTarget};
use crate::encode_ffmpeg::RecordSink;
use crate::error::{BingkaiError, BingkaiResult};
use crate::export::OutputBlob;
use crate::media::FrameSource;
use crate::progress::ProgressReporter;

#[derive(Clone, Debug)]
pub struct CaptureOpts {
    /// Playback rate the frame timestamps are derived from.
    pub fps: u32,
    /// Source duration in seconds; drives progress and the stop condition.
    pub duration_sec: f64,
    /// Extra wall-clock allowance on top of the duration before the soft
    /// timeout fires.
    pub timeout_buffer_sec: f64,
}

impl CaptureOpts {
    pub fn validate(&self) -> BingkaiResult<()> {
        if self.fps == 0 {
            return Err(BingkaiError::validation("capture fps must be non-zero"));
        }
        if !(self.duration_sec > 0.0) {
            return Err(BingkaiError::validation(
                "capture duration must be positive",
            ));
        }
        if self.timeout_buffer_sec < 0.0 {
            return Err(BingkaiError::validation(
                "capture timeout buffer must be non-negative",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_written: u64,
    /// Source ended (or duration reached) normally.
    pub reached_end: bool,
    /// The soft wall-clock guard fired and the output covers only part of the
    /// duration.
    pub timed_out: bool,
}

/// Run the capture loop to completion and finalize the sink.
///
/// Progress is reported as `min(t / duration, 0.99)` (throttled by the
/// reporter) and the terminal 1.0 is delivered once the sink has finalized.
pub fn run_capture(
    source: &mut dyn FrameSource,
    compositor: &mut Compositor,
    target: &mut RenderTarget,
    sink: &mut dyn RecordSink,
    opts: &CaptureOpts,
    progress: &mut ProgressReporter,
) -> BingkaiResult<(OutputBlob, CaptureStats)> {
    opts.validate()?;

    let deadline = Instant::now()
        + Duration::from_secs_f64(opts.duration_sec + opts.timeout_buffer_sec);
    let fps = f64::from(opts.fps);

    let mut stats = CaptureStats::default();

    loop {
        let t = stats.frames_written as f64 / fps;
        if t >= opts.duration_sec {
            stats.reached_end = true;
            break;
        }
        if Instant::now() > deadline {
            tracing::warn!(
                frames = stats.frames_written,
                "capture exceeded its time budget; finalizing partial output"
            );
            stats.timed_out = true;
            break;
        }

        let Some(frame) = source.next_frame()? else {
            if stats.frames_written == 0 {
                return Err(BingkaiError::playback(
                    "playback unavailable: source produced no frames",
                ));
            }
            stats.reached_end = true;
            break;
        };

        compositor.composite(target, &frame)?;
        sink.write_frame(target)?;
        stats.frames_written += 1;

        let played = stats.frames_written as f64 / fps;
        progress.report((played / opts.duration_sec).min(0.99));
    }

    let blob = sink.finish()?;
    progress.finish();
    Ok((blob, stats))
}
