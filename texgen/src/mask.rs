use image::{GrayImage, Luma};

use crate::config::MaskingConfig;
use crate::misc::{blur_mask, grow_mask};
use crate::projection::TexelSurface;
use crate::state::TextureState;

/// Every pixel eligible for generation; separate mode and grid tiles.
pub fn full_canvas_mask(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([255]))
}

/// Sequential-mode mask: regions not yet covered by earlier views,
/// restricted to pixels the current view can actually contribute to,
/// with a soft boundary band so the backend can blend new content into
/// existing content.
///
/// `surface` flags pixels with any geometry under them, `coverage` is
/// the canvas-space painted-ness of that geometry and `pixel_weights`
/// the current view's per-pixel confidence; all have canvas dimensions.
/// Background stays generatable so each view re-imagines its
/// surroundings freely; only surfaces obey the weight invariant.
pub fn sequential_mask(
    width: u32,
    height: u32,
    surface: &[bool],
    coverage: &[f64],
    pixel_weights: &[f64],
    masking: &MaskingConfig,
) -> GrayImage {
    let mut mask = GrayImage::new(width, height);

    for i in 0..height {
        for j in 0..width {
            let idx = (i * width + j) as usize;

            let value = if !surface[idx] {
                1.0
            } else if pixel_weights[idx] == 0.0 {
                0.0 // Zero-weight surface is never generatable.
            } else if masking.smooth {
                let span = masking.ramp_white - masking.ramp_black;
                let visible = ((coverage[idx] - masking.ramp_black) / span)
                    .clamp(0.0, 1.0);
                1.0 - visible
            } else if coverage[idx] < masking.binary_threshold {
                1.0
            } else {
                0.0
            };

            mask.put_pixel(j, i, Luma([(value * 255.0).round() as u8]));
        }
    }

    let mask = grow_mask(&mask, masking.grow_by);
    let mut mask = blur_mask(&mask, masking.blur_radius, masking.blur_sigma);

    // Grow and blur must not bleed into zero-weight surface pixels.
    for i in 0..height {
        for j in 0..width {
            let idx = (i * width + j) as usize;
            if surface[idx] && pixel_weights[idx] == 0.0 {
                mask.put_pixel(j, i, Luma([0]));
            }
        }
    }

    mask
}

/// Refine-mode mask: the inverse of the preserved region, or the full
/// canvas for a global re-style.
pub fn refine_mask(
    width: u32,
    height: u32,
    preserve: Option<&GrayImage>,
) -> GrayImage {
    match preserve {
        None => full_canvas_mask(width, height),
        Some(preserved) => {
            let mut mask = GrayImage::new(width, height);
            for i in 0..height {
                for j in 0..width {
                    let p = preserved.get_pixel(j, i)[0];
                    mask.put_pixel(j, i, Luma([255 - p]));
                }
            }
            mask
        }
    }
}

/// UV-inpaint mask, built directly in texture space: texels on the UV
/// chart that no view ever painted.
pub fn uv_inpaint_mask(
    surfaces: &[Option<TexelSurface>],
    state: &TextureState,
) -> GrayImage {
    let res = state.resolution;
    let mut mask = GrayImage::new(res, res);

    for i in 0..res {
        for j in 0..res {
            let idx = state.idx(i, j);
            if surfaces[idx].is_some() && !state.painted[idx] {
                mask.put_pixel(j, i, Luma([255]));
            }
        }
    }

    mask
}
