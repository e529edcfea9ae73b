//! Crop-to-fill geometry for drawing arbitrary-aspect sources into the fixed
//! portrait canvas.
//!
//! The policy is always fill, never letterbox: the shorter source dimension is
//! scaled to match the target and the excess on the longer dimension is
//! cropped symmetrically. Offsets are therefore zero or negative.

use crate::error::{BingkaiError, BingkaiResult};

/// Placement of a scaled source rectangle over a target surface.
///
/// `offset_x`/`offset_y` position the drawn rect relative to the target
/// origin; a negative offset means the source hangs over that edge and gets
/// cropped by the target bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FillGeometry {
    pub drawn_width: f64,
    pub drawn_height: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl FillGeometry {
    pub fn compute(
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> BingkaiResult<Self> {
        if source_width == 0 || source_height == 0 {
            return Err(BingkaiError::validation(
                "fill geometry requires non-zero source dimensions",
            ));
        }
        if target_width == 0 || target_height == 0 {
            return Err(BingkaiError::validation(
                "fill geometry requires non-zero target dimensions",
            ));
        }

        let target_w = f64::from(target_width);
        let target_h = f64::from(target_height);
        let source_aspect = f64::from(source_width) / f64::from(source_height);
        let target_aspect = target_w / target_h;

        let geo = if source_aspect > target_aspect {
            // Source relatively wider: match heights, crop left/right.
            let drawn_height = target_h;
            let drawn_width = target_h * source_aspect;
            Self {
                drawn_width,
                drawn_height,
                offset_x: (target_w - drawn_width) / 2.0,
                offset_y: 0.0,
            }
        } else {
            // Source relatively taller (or equal): match widths, crop top/bottom.
            let drawn_width = target_w;
            let drawn_height = target_w / source_aspect;
            Self {
                drawn_width,
                drawn_height,
                offset_x: 0.0,
                offset_y: (target_h - drawn_height) / 2.0,
            }
        };

        Ok(geo)
    }

    /// Map a target pixel center back to source pixel coordinates.
    ///
    /// Used by the sampler: every in-bounds target pixel maps inside the
    /// source because the drawn rect covers the whole target.
    pub fn target_to_source(
        &self,
        target_x: u32,
        target_y: u32,
        source_width: u32,
        source_height: u32,
    ) -> (f64, f64) {
        let tx = f64::from(target_x) + 0.5;
        let ty = f64::from(target_y) + 0.5;
        let sx = (tx - self.offset_x) * f64::from(source_width) / self.drawn_width;
        let sy = (ty - self.offset_y) * f64::from(source_height) / self.drawn_height;
        (sx - 0.5, sy - 0.5)
    }

    /// True when the drawn rect covers `target_width` x `target_height`
    /// entirely (no background visible through source content).
    pub fn covers_target(&self, target_width: u32, target_height: u32) -> bool {
        self.offset_x <= 1e-9
            && self.offset_y <= 1e-9
            && self.offset_x + self.drawn_width >= f64::from(target_width) - 1e-9
            && self.offset_y + self.drawn_height >= f64::from(target_height) - 1e-9
    }
}
