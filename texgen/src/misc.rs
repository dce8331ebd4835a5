use image::{GrayImage, Rgb, RgbImage};
use nalgebra::Const;

pub type Vector2 = nalgebra::Vector2<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Point3 = nalgebra::Point3<f64>;
pub type Matrix2 = nalgebra::Matrix2<f64>;
pub type Matrix4 = nalgebra::Matrix4<f64>;

pub struct BarycentricCoordinateSystem {
    vs: [Vector2; 3],
    qr: nalgebra::QR<f64, Const<2>, Const<2>>,
}

impl BarycentricCoordinateSystem {
    /// Returns `None` for degenerate triangles.
    pub fn try_new(vs: [Vector2; 3]) -> Option<Self> {
        let e1 = vs[1] - vs[0];
        let e2 = vs[2] - vs[0];
        let m22 = Matrix2::from_columns(&[e1, e2]);

        // Test the determinant against the edge scale; collinear corners
        // can leave the QR factorization formally invertible through
        // rounding alone.
        let scale = (e1.norm() * e2.norm()).max(f64::MIN_POSITIVE);
        if m22.determinant().abs() <= 1e-9 * scale {
            return None;
        }

        Some(Self { vs, qr: m22.qr() })
    }

    // The functions 'infer' and 'apply' are mutually inverse.

    pub fn infer(&self, v: Vector2) -> Vector3 {
        let &[l1, l2] = self.qr.solve(&(v - self.vs[0])).unwrap().as_ref();
        Vector3::new(1.0 - l1 - l2, l1, l2)
    }

    // Assuming the input 'u' sums to 1.0.
    pub fn apply(&self, u: Vector3) -> Vector2 {
        u[0] * self.vs[0] + u[1] * self.vs[1] + u[2] * self.vs[2]
    }
}

pub fn all_nonneg(v: Vector3) -> bool {
    v.iter().all(|&c| c >= 0.0)
}

pub fn get_pixel_ij_as_vector3(i: u32, j: u32, image: &RgbImage) -> Vector3 {
    let (x, y) = (j, i); // Beware: Transposing indices.
    let p = image.get_pixel(x, y);
    Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64)
}

pub fn set_pixel_ij_as_vector3(
    i: u32,
    j: u32,
    color: Vector3,
    image: &mut RgbImage,
) {
    let (x, y) = (j, i); // Beware: Transposing indices.
    let r = color[0].clamp(0.0, 255.0).round() as u8;
    let g = color[1].clamp(0.0, 255.0).round() as u8;
    let b = color[2].clamp(0.0, 255.0).round() as u8;
    image.put_pixel(x, y, Rgb([r, g, b]));
}

/// Bilinear sample at normalized [i, j] coordinates in [0, 1],
/// interpolating between texel centers.
pub fn sample_pixel(uv: Vector2, image: &RgbImage) -> Vector3 {
    let (w, h) = image.dimensions();
    let i = (uv[0].clamp(0.0, 1.0) * h as f64 - 0.5)
        .clamp(0.0, (h - 1) as f64);
    let j = (uv[1].clamp(0.0, 1.0) * w as f64 - 0.5)
        .clamp(0.0, (w - 1) as f64);
    let (i0, j0) = (i.floor() as u32, j.floor() as u32);
    let (i1, j1) = ((i0 + 1).min(h - 1), (j0 + 1).min(w - 1));
    let (di, dj) = (i - i0 as f64, j - j0 as f64);
    let s00 = get_pixel_ij_as_vector3(i0, j0, image);
    let s01 = get_pixel_ij_as_vector3(i0, j1, image);
    let s10 = get_pixel_ij_as_vector3(i1, j0, image);
    let s11 = get_pixel_ij_as_vector3(i1, j1, image);
    let s0 = (1.0 - dj) * s00 + dj * s01;
    let s1 = (1.0 - dj) * s10 + dj * s11;
    (1.0 - di) * s0 + di * s1
}

pub fn uv_to_ij(uv: Vector2, width: u32, height: u32) -> Vector2 {
    let [u, v] = *uv.as_ref();
    Vector2::new(
        height as f64 * u.clamp(0.0, 1.0),
        width as f64 * v.clamp(0.0, 1.0),
    )
}

pub fn ij_to_uv(ij: Vector2, width: u32, height: u32) -> Vector2 {
    let [i, j] = *ij.as_ref();
    Vector2::new(i / height as f64, j / width as f64)
}

/// Grow white regions of a grayscale mask by a square radius.
pub fn grow_mask(mask: &GrayImage, radius: u32) -> GrayImage {
    let (w, h) = mask.dimensions();
    let mut output = mask.clone();
    let r = radius as i64;

    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut best = mask.get_pixel(x as u32, y as u32)[0];
            'check: for dy in -r..=r {
                for dx in -r..=r {
                    let (x1, y1) = (x + dx, y + dy);
                    if x1 >= 0
                        && x1 < w as i64
                        && y1 >= 0
                        && y1 < h as i64
                    {
                        let v = mask.get_pixel(x1 as u32, y1 as u32)[0];
                        if v > best {
                            best = v;
                            if best == 255 {
                                break 'check;
                            }
                        }
                    }
                }
            }
            output.put_pixel(x as u32, y as u32, image::Luma([best]));
        }
    }

    output
}

/// Separable gaussian blur of a grayscale mask.
pub fn blur_mask(mask: &GrayImage, radius: u32, sigma: f64) -> GrayImage {
    if radius == 0 || sigma <= 0.0 {
        return mask.clone();
    }

    let r = radius as i64;
    let kernel: Vec<f64> = (-r..=r)
        .map(|d| (-(d * d) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();

    let (w, h) = mask.dimensions();
    let convolve = |src: &GrayImage, horizontal: bool| {
        let mut dst = src.clone();
        for y in 0..h as i64 {
            for x in 0..w as i64 {
                let mut acc = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    let d = k as i64 - r;
                    let (x1, y1) = if horizontal { (x + d, y) } else { (x, y + d) };
                    let x1 = x1.clamp(0, w as i64 - 1) as u32;
                    let y1 = y1.clamp(0, h as i64 - 1) as u32;
                    acc += weight * src.get_pixel(x1, y1)[0] as f64;
                }
                let v = (acc / norm).round().clamp(0.0, 255.0) as u8;
                dst.put_pixel(x as u32, y as u32, image::Luma([v]));
            }
        }
        dst
    };

    convolve(&convolve(mask, true), false)
}

#[cfg(test)]
mod test {
    use super::*;

    use base::assert_eq_f64;

    #[test]
    fn test_barycentric_infer_apply_inverse() {
        let bcs = BarycentricCoordinateSystem::try_new([
            Vector2::new(0.0, 0.0),
            Vector2::new(4.0, 0.0),
            Vector2::new(0.0, 2.0),
        ])
        .unwrap();

        let v = Vector2::new(1.0, 0.5);
        let bary = bcs.infer(v);
        assert_eq_f64!(bary.iter().sum::<f64>(), 1.0);
        let back = bcs.apply(bary);
        assert_eq_f64!(back[0], v[0]);
        assert_eq_f64!(back[1], v[1]);
    }

    #[test]
    fn test_barycentric_degenerate() {
        let collinear = [
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 1.0),
            Vector2::new(2.0, 2.0),
        ];
        assert!(BarycentricCoordinateSystem::try_new(collinear).is_none());

        let near_collinear = [
            Vector2::new(0.0, 0.0),
            Vector2::new(1000.0, 1000.0),
            Vector2::new(2000.0, 2000.0 + 1e-9),
        ];
        assert!(
            BarycentricCoordinateSystem::try_new(near_collinear).is_none()
        );
    }

    #[test]
    fn test_sample_pixel_bilinear() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([0, 0, 0]));
        img.put_pixel(1, 0, Rgb([255, 255, 255]));

        let mid = sample_pixel(Vector2::new(0.0, 0.5), &img);
        assert_eq_f64!(mid[0], 127.5);
    }

    #[test]
    fn test_grow_mask() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(2, 2, image::Luma([255]));

        let grown = grow_mask(&mask, 1);
        assert_eq!(grown.get_pixel(1, 2)[0], 255);
        assert_eq!(grown.get_pixel(3, 3)[0], 255);
        assert_eq!(grown.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_uv_ij_roundtrip() {
        let uv = Vector2::new(0.25, 0.75);
        let ij = uv_to_ij(uv, 512, 256);
        let back = ij_to_uv(ij, 512, 256);
        assert_eq_f64!(back[0], uv[0]);
        assert_eq_f64!(back[1], uv[1]);
    }
}
