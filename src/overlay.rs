//! The bingkai asset: the fixed decorative overlay composited on top of user
//! media.
//!
//! Loaded once per session and owned by the pipeline that uses it. The decoded
//! raster is normalized to the output canvas dimensions at load time so the
//! compositor can blend it 1:1 without per-frame scaling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{BingkaiError, BingkaiResult};

#[derive(Clone, Debug)]
pub struct OverlayAsset {
    pub width: u32,
    pub height: u32,
    /// Premultiplied RGBA8, row-major, `width * height * 4` bytes.
    pub rgba8_premul: Arc<Vec<u8>>,
    /// Where the asset came from, when it came from disk. The external
    /// encoder needs a real file to hand to ffmpeg as a second input.
    pub source_path: Option<PathBuf>,
}

impl OverlayAsset {
    /// Load and decode the overlay from disk, resampling to the target canvas
    /// dimensions when the file has other dimensions.
    pub fn load(path: &Path, target_width: u32, target_height: u32) -> BingkaiResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            BingkaiError::resource_load(format!(
                "failed to read overlay '{}': {e}",
                path.display()
            ))
        })?;
        let mut asset = Self::decode(&bytes, target_width, target_height)?;
        asset.source_path = Some(path.to_path_buf());
        Ok(asset)
    }

    /// Decode an overlay from in-memory bytes.
    pub fn decode(bytes: &[u8], target_width: u32, target_height: u32) -> BingkaiResult<Self> {
        if target_width == 0 || target_height == 0 {
            return Err(BingkaiError::validation(
                "overlay target dimensions must be non-zero",
            ));
        }

        let dyn_img = image::load_from_memory(bytes)
            .map_err(|e| BingkaiError::resource_load(format!("failed to decode overlay: {e}")))?;
        let mut rgba = dyn_img.to_rgba8();

        let (w, h) = rgba.dimensions();
        if (w, h) != (target_width, target_height) {
            tracing::info!(
                "resampling overlay from {w}x{h} to {target_width}x{target_height}"
            );
            rgba = image::imageops::resize(
                &rgba,
                target_width,
                target_height,
                image::imageops::FilterType::Triangle,
            );
        }

        let mut rgba8_premul = rgba.into_raw();
        premultiply_rgba8_in_place(&mut rgba8_premul);

        Ok(Self {
            width: target_width,
            height: target_height,
            rgba8_premul: Arc::new(rgba8_premul),
            source_path: None,
        })
    }
}

pub(crate) fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        if a == 255 {
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn png_bytes(width: u32, height: u32, px: [u8; 4]) -> Vec<u8> {
        let raw = px.repeat((width * height) as usize);
        let img = image::RgbaImage::from_raw(width, height, raw).unwrap();
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn decode_premultiplies_half_transparent_pixels() {
        let bytes = png_bytes(2, 2, [100, 50, 200, 128]);
        let asset = OverlayAsset::decode(&bytes, 2, 2).unwrap();
        assert_eq!(asset.width, 2);
        assert_eq!(asset.height, 2);
        assert_eq!(
            &asset.rgba8_premul[0..4],
            &[
                ((100u16 * 128 + 127) / 255) as u8,
                ((50u16 * 128 + 127) / 255) as u8,
                ((200u16 * 128 + 127) / 255) as u8,
                128u8
            ]
        );
    }

    #[test]
    fn decode_resamples_to_target_dimensions() {
        let bytes = png_bytes(4, 4, [10, 20, 30, 255]);
        let asset = OverlayAsset::decode(&bytes, 8, 16).unwrap();
        assert_eq!(asset.width, 8);
        assert_eq!(asset.height, 16);
        assert_eq!(asset.rgba8_premul.len(), 8 * 16 * 4);
        // Uniform source stays uniform after resampling.
        assert_eq!(&asset.rgba8_premul[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn garbage_bytes_are_a_resource_load_error() {
        let err = OverlayAsset::decode(b"not an image", 2, 2).unwrap_err();
        assert!(matches!(err, BingkaiError::ResourceLoad(_)));
    }

    #[test]
    fn load_missing_file_is_a_resource_load_error() {
        let err =
            OverlayAsset::load(Path::new("definitely/not/here.png"), 2, 2).unwrap_err();
        assert!(matches!(err, BingkaiError::ResourceLoad(_)));
    }
}
