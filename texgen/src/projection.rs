use image::{Rgb, RgbImage};
use rayon::prelude::*;

use crate::config::WeightingConfig;
use crate::mesh::Mesh;
use crate::misc::*;
use crate::view::View;

pub struct ProjectedPoint {
    pub point: Vector2,
    pub depth: f64,
}

/// Projects a world point into normalized [i, j] canvas coordinates,
/// both in [0, 1] inside the frustum. Depth is the distance along the
/// camera's forward axis; callers must reject non-positive depths.
pub fn project_point(
    view_matrix: &Matrix4,
    tan_half_fov: f64,
    width: u32,
    height: u32,
    point: &Point3,
) -> ProjectedPoint {
    let frame = view_matrix.transform_point(point);

    // Redo camera screen projection.
    let depth = -frame.z;
    let u = frame.x / depth;
    let v = -frame.y / depth;

    // Apply camera field of view (horizontal).
    let w = u * (width as f64 / 2.0) / tan_half_fov;
    let h = v * (width as f64 / 2.0) / tan_half_fov;

    // Standardize to the interval [0, 1].
    let i = (h + height as f64 / 2.0) / height as f64;
    let j = (w + width as f64 / 2.0) / width as f64;

    ProjectedPoint {
        point: Vector2::new(i, j),
        depth,
    }
}

pub fn project_like_camera(
    view: &View,
    width: u32,
    height: u32,
    points: &[Point3],
) -> Vec<ProjectedPoint> {
    let view_matrix = view.view_matrix();
    let tan = view.tan_half_fov();
    points
        .iter()
        .map(|p| project_point(&view_matrix, tan, width, height, p))
        .collect()
}

/// Screen-space scene buffers rendered from one view: nearest-hit depth,
/// world-space normal and (mesh, uv) of the nearest surface per pixel.
pub struct GBuffer {
    pub width: u32,
    pub height: u32,
    pub depth: Vec<f64>,
    pub normal: Vec<Vector3>,
    pub surface: Vec<Option<(usize, Vector2)>>,
}

impl GBuffer {
    fn new(width: u32, height: u32) -> Self {
        let len = (width * height) as usize;
        GBuffer {
            width,
            height,
            depth: vec![f64::INFINITY; len],
            normal: vec![Vector3::zeros(); len],
            surface: vec![None; len],
        }
    }

    pub fn idx(&self, i: u32, j: u32) -> usize {
        (i * self.width + j) as usize
    }

    /// Nearest-hit depth in the 2x2 pixel neighborhood around normalized
    /// [i, j] coordinates. A single point sample can slip between the
    /// covered pixels of a rasterized occluder near its silhouette, so
    /// visibility is decided against the nearest depth in the
    /// neighborhood instead.
    pub fn nearest_depth_around(&self, point: Vector2) -> f64 {
        let i = (point[0] * self.height as f64 - 0.5).floor() as i64;
        let j = (point[1] * self.width as f64 - 0.5).floor() as i64;

        let mut nearest = f64::INFINITY;
        for di in 0..2 {
            for dj in 0..2 {
                let i1 = (i + di).clamp(0, self.height as i64 - 1) as u32;
                let j1 = (j + dj).clamp(0, self.width as i64 - 1) as u32;
                nearest = nearest.min(self.depth[self.idx(i1, j1)]);
            }
        }
        nearest
    }

    pub fn surface_at(&self, i: u32, j: u32) -> Option<(usize, Vector2)> {
        self.surface[self.idx(i, j)]
    }
}

/// Rasterizes all meshes into a z-buffered G-buffer. Nearest-hit
/// semantics cover both self-occlusion and occlusion by other meshes.
pub fn render_gbuffer(
    meshes: &[Mesh],
    view: &View,
    width: u32,
    height: u32,
) -> GBuffer {
    let mut gbuffer = GBuffer::new(width, height);

    for (mesh_idx, mesh) in meshes.iter().enumerate() {
        let proj = project_like_camera(view, width, height, &mesh.vertices);

        for (face_idx, &[v0, v1, v2]) in mesh.faces.iter().enumerate() {
            let corners = [&proj[v0], &proj[v1], &proj[v2]];
            if corners.iter().any(|p| p.depth <= 0.0) {
                continue; // Behind the near plane.
            }

            let ij = [
                uv_to_ij(corners[0].point, width, height),
                uv_to_ij(corners[1].point, width, height),
                uv_to_ij(corners[2].point, width, height),
            ];
            let bcs = match BarycentricCoordinateSystem::try_new(ij) {
                Some(bcs) => bcs,
                None => continue,
            };

            let clamp_i = |x: f64| (x.max(0.0) as u32).min(height - 1);
            let clamp_j = |x: f64| (x.max(0.0) as u32).min(width - 1);
            let i0 = clamp_i(ij.iter().map(|v| v[0]).fold(f64::MAX, f64::min));
            let i1 = clamp_i(ij.iter().map(|v| v[0]).fold(f64::MIN, f64::max));
            let j0 = clamp_j(ij.iter().map(|v| v[1]).fold(f64::MAX, f64::min));
            let j1 = clamp_j(ij.iter().map(|v| v[1]).fold(f64::MIN, f64::max));

            let normals = [
                mesh.normals[v0],
                mesh.normals[v1],
                mesh.normals[v2],
            ];
            let uvs = mesh.face_uvs(face_idx);

            for i in i0..=i1 {
                for j in j0..=j1 {
                    let bary =
                        bcs.infer(Vector2::new(i as f64, j as f64));
                    if !all_nonneg(bary) {
                        continue;
                    }

                    let depth = bary[0] * corners[0].depth
                        + bary[1] * corners[1].depth
                        + bary[2] * corners[2].depth;
                    let idx = gbuffer.idx(i, j);
                    if depth >= gbuffer.depth[idx] {
                        continue;
                    }

                    let normal = (bary[0] * normals[0]
                        + bary[1] * normals[1]
                        + bary[2] * normals[2])
                        .normalize();
                    gbuffer.depth[idx] = depth;
                    gbuffer.normal[idx] = normal;
                    gbuffer.surface[idx] = uvs.map(|[t0, t1, t2]| {
                        let uv = bary[0] * t0 + bary[1] * t1 + bary[2] * t2;
                        (mesh_idx, uv)
                    });
                }
            }
        }
    }

    gbuffer
}

/// Structural hint images derived from geometry, used to constrain the
/// backend: depth ramp, view-space normals and geometric edges.
pub struct GuidanceBundle {
    pub depth: RgbImage,
    pub normal: RgbImage,
    pub edge: RgbImage,
}

pub fn guidance_from_gbuffer(
    gbuffer: &GBuffer,
    view: &View,
    canny_low: u8,
    canny_high: u8,
) -> GuidanceBundle {
    GuidanceBundle {
        depth: depth_map(gbuffer),
        normal: normal_map(gbuffer, view),
        edge: edge_map(gbuffer, canny_low, canny_high),
    }
}

fn depth_bounds(gbuffer: &GBuffer) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &d in &gbuffer.depth {
        if d.is_finite() {
            min = min.min(d);
            max = max.max(d);
        }
    }
    if min.is_finite() {
        Some((min, max))
    } else {
        None
    }
}

/// Near surfaces white, far surfaces dark, background black.
fn depth_map(gbuffer: &GBuffer) -> RgbImage {
    let mut img = RgbImage::new(gbuffer.width, gbuffer.height);
    let (min, max) = match depth_bounds(gbuffer) {
        Some(bounds) => bounds,
        None => return img,
    };
    let range = (max - min).max(1e-12);

    for i in 0..gbuffer.height {
        for j in 0..gbuffer.width {
            let d = gbuffer.depth[gbuffer.idx(i, j)];
            if d.is_finite() {
                let t = 1.0 - (d - min) / range;
                let v = (32.0 + t * 223.0).round() as u8;
                img.put_pixel(j, i, Rgb([v, v, v]));
            }
        }
    }
    img
}

fn normal_map(gbuffer: &GBuffer, view: &View) -> RgbImage {
    let rot = view.view_matrix().fixed_slice::<3, 3>(0, 0).into_owned();
    let mut img = RgbImage::new(gbuffer.width, gbuffer.height);

    let encode = |x: f64| ((x * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0) as u8;
    for i in 0..gbuffer.height {
        for j in 0..gbuffer.width {
            let idx = gbuffer.idx(i, j);
            let pixel = if gbuffer.depth[idx].is_finite() {
                let n = rot * gbuffer.normal[idx];
                Rgb([encode(n[0]), encode(-n[1]), encode(n[2])])
            } else {
                Rgb([128, 128, 255]) // Flat background normal.
            };
            img.put_pixel(j, i, pixel);
        }
    }
    img
}

/// Canny-style geometric edge pass over depth and normal discontinuities
/// with the usual two-threshold hysteresis, single propagation step.
fn edge_map(gbuffer: &GBuffer, low: u8, high: u8) -> RgbImage {
    let (w, h) = (gbuffer.width, gbuffer.height);
    let range = depth_bounds(gbuffer)
        .map(|(min, max)| (max - min).max(1e-12))
        .unwrap_or(1.0);

    let mut magnitude = vec![0.0f64; (w * h) as usize];
    for i in 0..h {
        for j in 0..w {
            let idx = gbuffer.idx(i, j);
            let d = gbuffer.depth[idx];
            let n = gbuffer.normal[idx];

            let mut mag: f64 = 0.0;
            for (i1, j1) in [
                (i.wrapping_sub(1), j),
                (i + 1, j),
                (i, j.wrapping_sub(1)),
                (i, j + 1),
            ] {
                if i1 >= h || j1 >= w {
                    continue;
                }
                let idx1 = gbuffer.idx(i1, j1);
                let d1 = gbuffer.depth[idx1];

                if d.is_finite() != d1.is_finite() {
                    mag = 1.0; // Silhouette.
                } else if d.is_finite() {
                    let depth_term = (d - d1).abs() / (0.05 * range);
                    let normal_term =
                        n.dot(&gbuffer.normal[idx1]).clamp(-1.0, 1.0).acos()
                            / std::f64::consts::FRAC_PI_2;
                    mag = mag.max(depth_term.max(normal_term));
                }
            }
            magnitude[idx] = mag.min(1.0) * 255.0;
        }
    }

    let mut img = RgbImage::new(w, h);
    for i in 0..h {
        for j in 0..w {
            let idx = gbuffer.idx(i, j);
            let strong = magnitude[idx] >= high as f64;
            let weak = magnitude[idx] >= low.max(1) as f64;

            let lit = strong
                || (weak && {
                    let mut near_strong = false;
                    for (i1, j1) in [
                        (i.wrapping_sub(1), j),
                        (i + 1, j),
                        (i, j.wrapping_sub(1)),
                        (i, j + 1),
                    ] {
                        if i1 < h
                            && j1 < w
                            && magnitude[gbuffer.idx(i1, j1)] >= high as f64
                        {
                            near_strong = true;
                            break;
                        }
                    }
                    near_strong
                });
            if lit {
                img.put_pixel(j, i, Rgb([255, 255, 255]));
            }
        }
    }
    img
}

/// World-space surface point behind one texel of a mesh's texture.
#[derive(Clone, Copy)]
pub struct TexelSurface {
    pub position: Point3,
    pub normal: Vector3,
}

/// Rasterizes the mesh's faces in UV space, producing the surface point
/// and normal covered by each texel (or `None` off the chart).
pub fn rasterize_texel_surfaces(
    mesh: &Mesh,
    resolution: u32,
) -> Vec<Option<TexelSurface>> {
    let res = resolution;
    let mut surfaces = vec![None; (res * res) as usize];

    for (face_idx, &[v0, v1, v2]) in mesh.faces.iter().enumerate() {
        // Faces without texture coordinates own no texels.
        let [t0, t1, t2] = match mesh.face_uvs(face_idx) {
            Some(uvs) => uvs,
            None => continue,
        };
        let ij = [
            uv_to_ij(t0, res, res),
            uv_to_ij(t1, res, res),
            uv_to_ij(t2, res, res),
        ];
        // Zero-area UV triangles contribute no texels.
        let bcs = match BarycentricCoordinateSystem::try_new(ij) {
            Some(bcs) => bcs,
            None => continue,
        };

        let positions = [
            mesh.vertices[v0],
            mesh.vertices[v1],
            mesh.vertices[v2],
        ];
        let normals =
            [mesh.normals[v0], mesh.normals[v1], mesh.normals[v2]];

        let clamp = |x: f64| (x.max(0.0) as u32).min(res - 1);
        let i0 = clamp(ij.iter().map(|v| v[0]).fold(f64::MAX, f64::min));
        let i1 = clamp(ij.iter().map(|v| v[0]).fold(f64::MIN, f64::max));
        let j0 = clamp(ij.iter().map(|v| v[1]).fold(f64::MAX, f64::min));
        let j1 = clamp(ij.iter().map(|v| v[1]).fold(f64::MIN, f64::max));

        for i in i0..=i1 {
            for j in j0..=j1 {
                let bary = bcs.infer(Vector2::new(i as f64, j as f64));
                if !all_nonneg(bary) {
                    continue;
                }
                let position = Point3::from(
                    bary[0] * positions[0].coords
                        + bary[1] * positions[1].coords
                        + bary[2] * positions[2].coords,
                );
                let normal = (bary[0] * normals[0]
                    + bary[1] * normals[1]
                    + bary[2] * normals[2])
                    .normalize();
                surfaces[(i * res + j) as usize] =
                    Some(TexelSurface { position, normal });
            }
        }
    }

    surfaces
}

// Interpolated rasterizer depth and re-projected point depth disagree
// slightly; tolerate that much when deciding visibility.
const OCCLUSION_DEPTH_TOLERANCE: f64 = 5e-3;

/// Per-texel confidence that this view should contribute to the surface
/// point behind the texel, plus the canvas point the texel projects to
/// (present only where the weight is positive).
pub struct WeightField {
    pub resolution: u32,
    pub weights: Vec<f64>,
    pub canvas_points: Vec<Option<Vector2>>,
}

impl WeightField {
    pub fn coverage(&self) -> usize {
        self.weights.iter().filter(|&&w| w > 0.0).count()
    }
}

pub fn compute_weight_field(
    surfaces: &[Option<TexelSurface>],
    view: &View,
    gbuffer: &GBuffer,
    weighting: &WeightingConfig,
    resolution: u32,
) -> WeightField {
    let view_matrix = view.view_matrix();
    let rot = view_matrix.fixed_slice::<3, 3>(0, 0).into_owned();
    let tan = view.tan_half_fov();
    let discard_cos = weighting.discard_over_angle_deg.to_radians().cos();

    let evaluated: Vec<(f64, Option<Vector2>)> = surfaces
        .par_iter()
        .map(|surface| {
            let surface = match surface {
                Some(surface) => surface,
                None => return (0.0, None),
            };

            let proj = project_point(
                &view_matrix,
                tan,
                gbuffer.width,
                gbuffer.height,
                &surface.position,
            );
            if proj.depth <= 0.0 {
                return (0.0, None);
            }
            let [i, j] = *proj.point.as_ref();
            if !(0.0..=1.0).contains(&i) || !(0.0..=1.0).contains(&j) {
                return (0.0, None);
            }

            // Nearest-hit occlusion test against the whole scene.
            let nearest = gbuffer.nearest_depth_around(proj.point);
            if proj.depth > nearest * (1.0 + OCCLUSION_DEPTH_TOLERANCE) {
                return (0.0, None);
            }

            // Facing is measured against the camera forward axis, the
            // same term the canvas-space weights use.
            let facing = (rot * surface.normal)[2];
            if facing <= 0.0 || facing < discard_cos {
                return (0.0, None);
            }

            (facing.powf(weighting.exponent), Some(proj.point))
        })
        .collect();

    let mut weights = Vec::with_capacity(evaluated.len());
    let mut canvas_points = Vec::with_capacity(evaluated.len());
    for (weight, point) in evaluated {
        weights.push(weight);
        canvas_points.push(point);
    }

    WeightField {
        resolution,
        weights,
        canvas_points,
    }
}

/// Canvas-space confidence per pixel: the facing-angle weight of the
/// nearest surface, 0 for background. Pixels are visible by
/// construction, so no occlusion term applies here.
pub fn render_pixel_weights(
    gbuffer: &GBuffer,
    view: &View,
    weighting: &WeightingConfig,
) -> Vec<f64> {
    let view_matrix = view.view_matrix();
    let rot = view_matrix.fixed_slice::<3, 3>(0, 0).into_owned();
    let discard_cos = weighting.discard_over_angle_deg.to_radians().cos();

    gbuffer
        .depth
        .iter()
        .zip(&gbuffer.normal)
        .map(|(&depth, normal)| {
            if !depth.is_finite() {
                return 0.0;
            }
            // In view space the camera looks down -Z; a surface facing
            // the camera has a +Z normal.
            let facing = (rot * normal)[2];
            if facing <= 0.0 || facing < discard_cos {
                0.0
            } else {
                facing.powf(weighting.exponent)
            }
        })
        .collect()
}

/// One pass over a (scene, view) pair: the guidance bundle plus one
/// weight field per mesh. Never touches accumulated texture state.
pub struct ViewSample {
    pub gbuffer: GBuffer,
    pub guidance: GuidanceBundle,
    pub weights: Vec<WeightField>,
}

#[allow(clippy::too_many_arguments)]
pub fn sample_view(
    meshes: &[Mesh],
    surfaces: &[Vec<Option<TexelSurface>>],
    view: &View,
    canvas_width: u32,
    canvas_height: u32,
    texture_resolution: u32,
    weighting: &WeightingConfig,
    canny_low: u8,
    canny_high: u8,
) -> ViewSample {
    let gbuffer = render_gbuffer(meshes, view, canvas_width, canvas_height);
    let guidance =
        guidance_from_gbuffer(&gbuffer, view, canny_low, canny_high);
    let weights = surfaces
        .iter()
        .map(|mesh_surfaces| {
            compute_weight_field(
                mesh_surfaces,
                view,
                &gbuffer,
                weighting,
                texture_resolution,
            )
        })
        .collect();

    ViewSample {
        gbuffer,
        guidance,
        weights,
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    use base::assert_eq_f64;

    use crate::mesh::test::new_quad;
    use crate::view::test::new_top_view;

    pub const RES: u32 = 32;

    pub fn quad_scene() -> (Vec<Mesh>, Vec<Vec<Option<TexelSurface>>>) {
        let mesh = new_quad("quad");
        let surfaces = vec![rasterize_texel_surfaces(&mesh, RES)];
        (vec![mesh], surfaces)
    }

    fn facing_weights(exponent: f64, discard_deg: f64) -> WeightField {
        let (meshes, surfaces) = quad_scene();
        let view = new_top_view(2.0);
        let gbuffer = render_gbuffer(&meshes, &view, RES, RES);
        compute_weight_field(
            &surfaces[0],
            &view,
            &gbuffer,
            &WeightingConfig {
                discard_over_angle_deg: discard_deg,
                exponent,
            },
            RES,
        )
    }

    #[test]
    fn test_project_point_center() {
        let view = new_top_view(2.0);
        let proj = project_point(
            &view.view_matrix(),
            view.tan_half_fov(),
            64,
            64,
            &Point3::new(0.5, 0.5, 0.0),
        );
        assert_eq_f64!(proj.depth, 2.0);
        assert_eq_f64!(proj.point[0], 0.5);
        assert_eq_f64!(proj.point[1], 0.5);
    }

    #[test]
    fn test_facing_quad_weight_is_one() {
        let field = facing_weights(1.0, 90.0);
        assert!(field.coverage() > 0);
        for (idx, &w) in field.weights.iter().enumerate() {
            if w > 0.0 {
                assert_eq_f64!(w, 1.0, 1e-6);
                assert!(field.canvas_points[idx].is_some());
            }
        }
    }

    #[test]
    fn test_weight_exponent_falloff() {
        let (_, mut surfaces) = quad_scene();
        let angle: f64 = 60f64.to_radians();
        for surface in surfaces[0].iter_mut().flatten() {
            surface.normal =
                Vector3::new(angle.sin(), 0.0, angle.cos());
        }

        let (meshes, _) = quad_scene();
        let view = new_top_view(2.0);
        let gbuffer = render_gbuffer(&meshes, &view, RES, RES);

        // The tilt is uniform, so every covered texel carries cos^2 60.
        let field = compute_weight_field(
            &surfaces[0],
            &view,
            &gbuffer,
            &WeightingConfig {
                discard_over_angle_deg: 75.0,
                exponent: 2.0,
            },
            RES,
        );
        let center = ((RES / 2) * RES + RES / 2) as usize;
        assert_eq_f64!(field.weights[center], 0.25, 1e-6);

        // Beyond the discard angle the weight reaches exactly zero.
        let field = compute_weight_field(
            &surfaces[0],
            &view,
            &gbuffer,
            &WeightingConfig {
                discard_over_angle_deg: 45.0,
                exponent: 2.0,
            },
            RES,
        );
        assert_eq_f64!(field.weights[center], 0.0);
    }

    #[test]
    fn test_occluded_texels_have_zero_weight() {
        let lower = new_quad("lower");
        let mut upper = new_quad("upper");
        for v in &mut upper.vertices {
            v.z = 1.0;
        }

        let meshes = vec![lower.clone(), upper];
        let surfaces = rasterize_texel_surfaces(&lower, RES);
        let view = new_top_view(3.0);
        let gbuffer = render_gbuffer(&meshes, &view, RES, RES);

        let field = compute_weight_field(
            &surfaces,
            &view,
            &gbuffer,
            &WeightingConfig::default(),
            RES,
        );
        assert_eq!(field.coverage(), 0);
    }

    #[test]
    fn test_points_behind_camera_have_zero_weight() {
        let (meshes, surfaces) = quad_scene();
        let view = crate::view::View {
            eye: [0.5, 0.5, -2.0],
            target: [0.5, 0.5, -4.0],
            fov_deg: 60.0,
            prompt: None,
        };
        let gbuffer = render_gbuffer(&meshes, &view, RES, RES);
        let field = compute_weight_field(
            &surfaces[0],
            &view,
            &gbuffer,
            &WeightingConfig::default(),
            RES,
        );
        assert_eq!(field.coverage(), 0);
    }

    #[test]
    fn test_gbuffer_background_is_infinite() {
        let (meshes, _) = quad_scene();
        let gbuffer = render_gbuffer(&meshes, &new_top_view(2.0), RES, RES);
        assert!(gbuffer.depth[gbuffer.idx(0, 0)].is_infinite());
        let center = gbuffer.depth[gbuffer.idx(RES / 2, RES / 2)];
        assert_eq_f64!(center, 2.0, 1e-9);
    }

    #[test]
    fn test_guidance_maps() {
        let (meshes, _) = quad_scene();
        let view = new_top_view(2.0);
        let gbuffer = render_gbuffer(&meshes, &view, RES, RES);
        let guidance = guidance_from_gbuffer(&gbuffer, &view, 0, 80);

        // Background is black in the depth map, flat in the normal map.
        assert_eq!(guidance.depth.get_pixel(0, 0)[0], 0);
        assert_eq!(*guidance.normal.get_pixel(0, 0), Rgb([128, 128, 255]));

        // The quad faces the camera, so its view-space normal is +Z.
        let center = guidance.normal.get_pixel(RES / 2, RES / 2);
        assert_eq!(center[2], 255);

        // The silhouette shows up as a strong edge.
        let lit = guidance
            .edge
            .pixels()
            .filter(|p| p[0] == 255)
            .count();
        assert!(lit > 0);
    }

    #[test]
    fn test_texel_surfaces_skip_faces_without_uvs() {
        let obj = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
f 1/1 2/2 3/3
f 1 3 4
";
        let mesh = crate::mesh::read_obj("mixed", obj.as_bytes()).unwrap();
        assert!(!mesh.has_degenerate_uvs());

        let surfaces = rasterize_texel_surfaces(&mesh, RES);
        let covered = surfaces.iter().filter(|s| s.is_some()).count();

        // Only the textured triangle owns texels, about half the chart.
        assert!(covered > 0);
        assert!((covered as f64) < 0.6 * (RES * RES) as f64);
    }

    #[test]
    fn test_texel_surfaces_cover_chart() {
        let (_, surfaces) = quad_scene();
        let covered =
            surfaces[0].iter().filter(|s| s.is_some()).count();
        // The unit quad maps onto the whole texture.
        assert!(covered as f64 > 0.9 * (RES * RES) as f64);

        let surface = surfaces[0][((RES / 2) * RES + RES / 2) as usize]
            .as_ref()
            .unwrap();
        assert_eq_f64!(surface.normal[2], 1.0);
        assert_eq_f64!(surface.position[2], 0.0);
    }
}
