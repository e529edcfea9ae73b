//! CPU compositor for the fixed portrait canvas.
//!
//! Draw order per frame: opaque background fill, then the source frame scaled
//! crop-to-fill, then the bingkai overlay across the whole canvas. All
//! blending is premultiplied-alpha `over`.

use crate::error::{BingkaiError, BingkaiResult};
use crate::geometry::FillGeometry;
use crate::media::SourceFrame;
use crate::overlay::OverlayAsset;

/// The reels output format: 1080x1920 portrait.
pub const REELS_WIDTH: u32 = 1080;
pub const REELS_HEIGHT: u32 = 1920;

pub type PremulRgba8 = [u8; 4];

/// Fixed-size premultiplied RGBA8 surface, reused across the frames of a job.
/// Dimensions never change after construction.
#[derive(Clone, Debug)]
pub struct RenderTarget {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RenderTarget {
    pub fn new(width: u32, height: u32) -> BingkaiResult<Self> {
        if width == 0 || height == 0 {
            return Err(BingkaiError::validation(
                "render target dimensions must be non-zero",
            ));
        }
        Ok(Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn fill(&mut self, rgba: PremulRgba8) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }
}

/// Composites source frames and the overlay into a [`RenderTarget`].
pub struct Compositor {
    target_width: u32,
    target_height: u32,
    background_rgba: [u8; 4],
    overlay: Option<OverlayAsset>,
    warned_missing_overlay: bool,
}

impl Compositor {
    /// `background_rgba` is an opaque straight-alpha color. A `None` overlay
    /// puts the compositor in degraded mode: source-only output, never an
    /// error.
    pub fn new(
        target_width: u32,
        target_height: u32,
        background_rgba: [u8; 4],
        overlay: Option<OverlayAsset>,
    ) -> BingkaiResult<Self> {
        if target_width == 0 || target_height == 0 {
            return Err(BingkaiError::validation(
                "compositor target dimensions must be non-zero",
            ));
        }
        if let Some(ovl) = &overlay
            && (ovl.width != target_width || ovl.height != target_height)
        {
            return Err(BingkaiError::validation(format!(
                "overlay is {}x{}, expected {target_width}x{target_height}",
                ovl.width, ovl.height
            )));
        }
        Ok(Self {
            target_width,
            target_height,
            background_rgba,
            overlay,
            warned_missing_overlay: false,
        })
    }

    pub fn reels(overlay: Option<OverlayAsset>) -> BingkaiResult<Self> {
        Self::new(REELS_WIDTH, REELS_HEIGHT, [0, 0, 0, 255], overlay)
    }

    pub fn new_target(&self) -> BingkaiResult<RenderTarget> {
        RenderTarget::new(self.target_width, self.target_height)
    }

    pub fn target_width(&self) -> u32 {
        self.target_width
    }

    pub fn target_height(&self) -> u32 {
        self.target_height
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Render one output frame from `frame` into `target`.
    pub fn composite(
        &mut self,
        target: &mut RenderTarget,
        frame: &SourceFrame,
    ) -> BingkaiResult<()> {
        if target.width != self.target_width || target.height != self.target_height {
            return Err(BingkaiError::validation(format!(
                "render target is {}x{}, compositor expects {}x{}",
                target.width, target.height, self.target_width, self.target_height
            )));
        }

        let mut bg = self.background_rgba;
        bg[3] = 255;
        target.fill(bg);

        self.draw_source(target, frame)?;

        match &self.overlay {
            Some(ovl) => over_in_place(&mut target.data, &ovl.rgba8_premul)?,
            None => {
                if !self.warned_missing_overlay {
                    tracing::warn!("no overlay asset loaded; compositing source only");
                    self.warned_missing_overlay = true;
                }
            }
        }

        Ok(())
    }

    fn draw_source(&self, target: &mut RenderTarget, frame: &SourceFrame) -> BingkaiResult<()> {
        let geo = FillGeometry::compute(
            frame.width,
            frame.height,
            self.target_width,
            self.target_height,
        )?;

        let tw = self.target_width as usize;
        for y in 0..self.target_height {
            let row = y as usize * tw * 4;
            for x in 0..self.target_width {
                let (sx, sy) = geo.target_to_source(x, y, frame.width, frame.height);
                let src = sample_bilinear(&frame.data, frame.width, frame.height, sx, sy);
                let idx = row + x as usize * 4;
                let dst = [
                    target.data[idx],
                    target.data[idx + 1],
                    target.data[idx + 2],
                    target.data[idx + 3],
                ];
                target.data[idx..idx + 4].copy_from_slice(&over(dst, src));
            }
        }
        Ok(())
    }
}

/// Premultiplied `src` over premultiplied `dst`.
pub fn over(dst: PremulRgba8, src: PremulRgba8) -> PremulRgba8 {
    if src[3] == 255 {
        return src;
    }
    if src[3] == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(src[3]);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = src[i].saturating_add(mul_div255(u16::from(dst[i]), inv));
    }
    out
}

pub fn over_in_place(dst: &mut [u8], src: &[u8]) -> BingkaiResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(BingkaiError::validation(
            "over_in_place expects equal-length rgba8 buffers",
        ));
    }
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&out);
    }
    Ok(())
}

fn sample_bilinear(data: &[u8], width: u32, height: u32, x: f64, y: f64) -> PremulRgba8 {
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - f64::from(x0);
    let fy = y - f64::from(y0);

    let px = |xi: u32, yi: u32| -> [f64; 4] {
        let idx = (yi as usize * width as usize + xi as usize) * 4;
        [
            f64::from(data[idx]),
            f64::from(data[idx + 1]),
            f64::from(data[idx + 2]),
            f64::from(data[idx + 3]),
        ]
    };

    let p00 = px(x0, y0);
    let p10 = px(x1, y0);
    let p01 = px(x0, y1);
    let p11 = px(x1, y1);

    let mut out = [0u8; 4];
    for i in 0..4 {
        let top = p00[i] * (1.0 - fx) + p10[i] * fx;
        let bot = p01[i] * (1.0 - fx) + p11[i] * fx;
        out[i] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}
