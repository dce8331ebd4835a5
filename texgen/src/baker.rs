use image::RgbImage;

use crate::misc::{set_pixel_ij_as_vector3, Vector3};
use crate::state::TextureState;

pub type EmptinessMask = Vec<Vec<bool>>; // Rectangular, image-shaped grid.

/// Resamples the accumulated texture state into a final texture image.
/// Only painted texels contribute; the painted region is then bled
/// outward by `gutter` pixels to hide chart seams under mipmapping and
/// the rest is filled with the fallback color. Deterministic for a
/// given state.
pub fn bake(
    state: &TextureState,
    resolution: u32,
    gutter: u32,
    fallback: Vector3,
) -> RgbImage {
    let mut buffer = RgbImage::new(resolution, resolution);
    let mut emask: EmptinessMask =
        vec![vec![true; resolution as usize]; resolution as usize];

    resample_painted(state, &mut buffer, &mut emask);
    extrapolate_gutter(&mut buffer, &mut emask, gutter as usize);

    for i in 0..resolution {
        for j in 0..resolution {
            if emask[i as usize][j as usize] {
                set_pixel_ij_as_vector3(i, j, fallback, &mut buffer);
            }
        }
    }

    buffer
}

/// Bilinear resampling that ignores unpainted source texels: each output
/// pixel averages its painted neighbor texels by bilinear weight and
/// stays empty when all four are unpainted.
fn resample_painted(
    state: &TextureState,
    buffer: &mut RgbImage,
    emask: &mut EmptinessMask,
) {
    let out_res = buffer.width();
    let scale = state.resolution as f64 / out_res as f64;
    let max = (state.resolution - 1) as f64;

    for i in 0..out_res {
        for j in 0..out_res {
            let si = ((i as f64 + 0.5) * scale - 0.5).clamp(0.0, max);
            let sj = ((j as f64 + 0.5) * scale - 0.5).clamp(0.0, max);
            let i0 = si.floor() as u32;
            let j0 = sj.floor() as u32;
            let i1 = (i0 + 1).min(state.resolution - 1);
            let j1 = (j0 + 1).min(state.resolution - 1);
            let di = si - i0 as f64;
            let dj = sj - j0 as f64;

            let corners = [
                (i0, j0, (1.0 - di) * (1.0 - dj)),
                (i0, j1, (1.0 - di) * dj),
                (i1, j0, di * (1.0 - dj)),
                (i1, j1, di * dj),
            ];

            let mut color = Vector3::zeros();
            let mut total = 0.0;
            for (ci, cj, w) in corners {
                let idx = state.idx(ci, cj);
                if state.painted[idx] && w > 0.0 {
                    color += state.colors[idx] * w;
                    total += w;
                }
            }

            if total > 0.0 {
                set_pixel_ij_as_vector3(i, j, color / total, buffer);
                emask[i as usize][j as usize] = false;
            }
        }
    }
}

pub fn extrapolate_gutter(
    buffer: &mut RgbImage,
    emask: &mut EmptinessMask,
    gutter_size: usize,
) {
    for _ in 0..gutter_size {
        for (i, j, i1, j1) in resolve_gutter_source(emask) {
            // Beware that the image is indexed as (j, i).
            buffer[(j, i)] = buffer[(j1, i1)];
            emask[i as usize][j as usize] = false;
        }
    }
}

fn resolve_gutter_source(emask: &EmptinessMask) -> Vec<(u32, u32, u32, u32)> {
    let mut idxs = vec![];
    let height = emask.len() as u32;
    for i in 0..height as i32 {
        let width = emask[i as usize].len() as u32;
        for j in 0..width as i32 {
            if emask[i as usize][j as usize] {
                for (i1, j1) in [(i - 1, j), (i + 1, j), (i, j - 1), (i, j + 1)]
                {
                    if 0 <= i1
                        && (i1 as u32) < height
                        && 0 <= j1
                        && (j1 as u32) < width
                        && !emask[i1 as usize][j1 as usize]
                    {
                        idxs.push((i as u32, j as u32, i1 as u32, j1 as u32));
                    }
                }
            }
        }
    }
    idxs
}
