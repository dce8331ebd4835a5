use image::{GrayImage, RgbImage};

use crate::misc::{sample_pixel, set_pixel_ij_as_vector3, Vector3};
use crate::projection::{GBuffer, WeightField};
use crate::state::TextureState;

/// Merges one view's generated image into the accumulated texture state
/// as a running weighted average:
///
///   color' = (color * weight + incoming * w) / (weight + w)
///   weight' = weight + w
///
/// Texels with zero incoming weight are left untouched; texels that
/// received any contribution are marked painted. The result does not
/// depend on the order equal-weight views are applied in.
pub fn composite_view(
    state: &mut TextureState,
    image: &RgbImage,
    field: &WeightField,
) {
    assert_eq!(field.resolution, state.resolution);

    for (idx, &incoming_weight) in field.weights.iter().enumerate() {
        if incoming_weight <= 0.0 {
            continue;
        }
        let point = match field.canvas_points[idx] {
            Some(point) => point,
            None => continue,
        };

        let incoming = sample_pixel(point, image);
        let old_weight = state.weights[idx];
        let total = old_weight + incoming_weight;
        state.colors[idx] = (state.colors[idx] * old_weight
            + incoming * incoming_weight)
            / total;
        state.weights[idx] = total;
        state.painted[idx] = true;
    }
}

/// Replaces blended content instead of averaging into it; used by refine
/// mode when preservation of the original texture is disabled.
pub fn composite_overwrite(
    state: &mut TextureState,
    image: &RgbImage,
    field: &WeightField,
) {
    assert_eq!(field.resolution, state.resolution);

    for (idx, &incoming_weight) in field.weights.iter().enumerate() {
        if incoming_weight <= 0.0 {
            continue;
        }
        if let Some(point) = field.canvas_points[idx] {
            state.colors[idx] = sample_pixel(point, image);
            state.weights[idx] = incoming_weight;
            state.painted[idx] = true;
        }
    }
}

/// Writes generated texels straight into UV space with weight 1; no
/// angle weighting applies. Only texels selected by the mask and not
/// already painted are written.
pub fn composite_uv_direct(
    state: &mut TextureState,
    image: &RgbImage,
    mask: &GrayImage,
) {
    let res = state.resolution;
    assert_eq!(image.dimensions(), (res, res));
    assert_eq!(mask.dimensions(), (res, res));

    for i in 0..res {
        for j in 0..res {
            let idx = state.idx(i, j);
            if mask.get_pixel(j, i)[0] < 128 || state.painted[idx] {
                continue;
            }
            let p = image.get_pixel(j, i);
            state.colors[idx] =
                Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64);
            state.weights[idx] = 1.0;
            state.painted[idx] = true;
        }
    }
}

/// Renders the current texture state as seen from the G-buffer's view:
/// the image-space input for sequential inpainting and refine passes.
/// Unpainted surface and background pixels get the fallback color.
pub fn render_state_preview(
    gbuffer: &GBuffer,
    states: &[TextureState],
    fallback: Vector3,
) -> RgbImage {
    let mut img = RgbImage::new(gbuffer.width, gbuffer.height);

    for i in 0..gbuffer.height {
        for j in 0..gbuffer.width {
            let color = match gbuffer.surface_at(i, j) {
                Some((mesh_idx, uv)) => {
                    let state = &states[mesh_idx];
                    let res = state.resolution;
                    // Texel rows follow the U axis, matching the UV
                    // rasterization in `rasterize_texel_surfaces`.
                    let ti = ((uv[0] * res as f64) as u32).min(res - 1);
                    let tj = ((uv[1] * res as f64) as u32).min(res - 1);
                    let idx = state.idx(ti, tj);
                    if state.painted[idx] {
                        state.colors[idx]
                    } else {
                        fallback
                    }
                }
                None => fallback,
            };
            set_pixel_ij_as_vector3(i, j, color, &mut img);
        }
    }

    img
}

/// Canvas-space map of how strongly the surface under each pixel has
/// already been painted, in [0, 1]; background pixels are 0. Input for
/// the sequential visibility mask.
pub fn render_coverage(
    gbuffer: &GBuffer,
    states: &[TextureState],
) -> Vec<f64> {
    let mut coverage = vec![0.0; (gbuffer.width * gbuffer.height) as usize];

    for i in 0..gbuffer.height {
        for j in 0..gbuffer.width {
            if let Some((mesh_idx, uv)) = gbuffer.surface_at(i, j) {
                let state = &states[mesh_idx];
                let res = state.resolution;
                let ti = ((uv[0] * res as f64) as u32).min(res - 1);
                let tj = ((uv[1] * res as f64) as u32).min(res - 1);
                let idx = state.idx(ti, tj);
                if state.painted[idx] {
                    coverage[gbuffer.idx(i, j)] =
                        state.weights[idx].clamp(0.0, 1.0);
                }
            }
        }
    }

    coverage
}
