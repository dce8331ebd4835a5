use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma, Rgba, RgbaImage};

use base::defs::{Error, ErrorKind::*, Result};
use base::util::fs;

use crate::misc::Vector3;

type WeightImage = ImageBuffer<Luma<u16>, Vec<u16>>;

// Accumulated weights are persisted in a 16-bit grayscale PNG with this
// fixed-point scale.
const WEIGHT_SCALE: f64 = 256.0;

/// Per-mesh running weighted-average texture: per-texel color (0..255
/// range), accumulated weight and painted flag. The durable result of a
/// run; created fresh or loaded from a previous run's persisted pair.
#[derive(Clone)]
pub struct TextureState {
    pub resolution: u32,
    pub colors: Vec<Vector3>,
    pub weights: Vec<f64>,
    pub painted: Vec<bool>,
}

impl TextureState {
    pub fn new(resolution: u32) -> Self {
        let len = (resolution * resolution) as usize;
        TextureState {
            resolution,
            colors: vec![Vector3::zeros(); len],
            weights: vec![0.0; len],
            painted: vec![false; len],
        }
    }

    pub fn idx(&self, i: u32, j: u32) -> usize {
        (i * self.resolution + j) as usize
    }

    pub fn painted_count(&self) -> usize {
        self.painted.iter().filter(|&&p| p).count()
    }

    /// Assigns the fallback color to texels no view ever contributed to.
    /// After this, every texel has a defined value.
    pub fn fill_fallback(&mut self, fallback: Vector3) {
        for (idx, &painted) in self.painted.iter().enumerate() {
            if !painted {
                self.colors[idx] = fallback;
            }
        }
    }

    /// Color plane with the painted flag in the alpha channel.
    pub fn color_image(&self) -> RgbaImage {
        let res = self.resolution;
        let mut img = RgbaImage::new(res, res);
        for i in 0..res {
            for j in 0..res {
                let idx = self.idx(i, j);
                let c = self.colors[idx];
                let a = if self.painted[idx] { 255 } else { 0 };
                img.put_pixel(
                    j,
                    i,
                    Rgba([
                        c[0].clamp(0.0, 255.0).round() as u8,
                        c[1].clamp(0.0, 255.0).round() as u8,
                        c[2].clamp(0.0, 255.0).round() as u8,
                        a,
                    ]),
                );
            }
        }
        img
    }

    fn weight_image(&self) -> WeightImage {
        let res = self.resolution;
        let mut img = WeightImage::new(res, res);
        for i in 0..res {
            for j in 0..res {
                let w = self.weights[self.idx(i, j)];
                let q = (w * WEIGHT_SCALE).round().min(u16::MAX as f64);
                img.put_pixel(j, i, Luma([q as u16]));
            }
        }
        img
    }

    pub fn color_path(dir: &Path, mesh_name: &str) -> PathBuf {
        dir.join(format!("{}_state_color.png", mesh_name))
    }

    pub fn weight_path(dir: &Path, mesh_name: &str) -> PathBuf {
        dir.join(format!("{}_state_weight.png", mesh_name))
    }

    /// Persists the state as a standard raster pair. Writing happens
    /// only between compositing commits, so the pair on disk is always a
    /// consistently-blended snapshot.
    pub fn save(&self, dir: &Path, mesh_name: &str) -> Result<()> {
        fs::ensure_dir(dir)?;
        let save_err = |path: &Path, e: image::ImageError| {
            Error::with_source(
                IoError,
                format!("failed to write state '{}'", path.display()),
                e,
            )
        };

        let color_path = Self::color_path(dir, mesh_name);
        let mut writer = BufWriter::new(fs::create_file(&color_path)?);
        self.color_image()
            .write_to(&mut writer, image::ImageOutputFormat::Png)
            .map_err(|e| save_err(&color_path, e))?;

        let weight_path = Self::weight_path(dir, mesh_name);
        let mut writer = BufWriter::new(fs::create_file(&weight_path)?);
        image::DynamicImage::ImageLuma16(self.weight_image())
            .write_to(&mut writer, image::ImageOutputFormat::Png)
            .map_err(|e| save_err(&weight_path, e))?;

        Ok(())
    }

    pub fn load(dir: &Path, mesh_name: &str, resolution: u32) -> Result<Self> {
        let load = |path: &PathBuf| {
            image::open(path).map_err(|e| {
                Error::with_source(
                    IoError,
                    format!("failed to read state '{}'", path.display()),
                    e,
                )
            })
        };

        let color = load(&Self::color_path(dir, mesh_name))?.into_rgba8();
        let weight = load(&Self::weight_path(dir, mesh_name))?.into_luma16();
        if color.dimensions() != (resolution, resolution)
            || weight.dimensions() != (resolution, resolution)
        {
            return Err(Error::new(
                MalformedData,
                format!(
                    "state images for '{}' do not match resolution {}",
                    mesh_name, resolution
                ),
            ));
        }

        let mut state = Self::new(resolution);
        for i in 0..resolution {
            for j in 0..resolution {
                let idx = state.idx(i, j);
                let c = color.get_pixel(j, i);
                state.colors[idx] =
                    Vector3::new(c[0] as f64, c[1] as f64, c[2] as f64);
                state.painted[idx] = c[3] > 0;
                state.weights[idx] =
                    weight.get_pixel(j, i)[0] as f64 / WEIGHT_SCALE;
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use base::assert_eq_f64;

    #[test]
    fn test_fill_fallback_covers_all_texels() {
        let mut state = TextureState::new(4);
        state.colors[5] = Vector3::new(10.0, 20.0, 30.0);
        state.painted[5] = true;

        state.fill_fallback(Vector3::new(128.0, 128.0, 128.0));
        for (idx, color) in state.colors.iter().enumerate() {
            if idx == 5 {
                assert_eq_f64!(color[0], 10.0);
            } else {
                assert_eq_f64!(color[0], 128.0);
            }
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut state = TextureState::new(8);
        state.colors[3] = Vector3::new(200.0, 100.0, 50.0);
        state.weights[3] = 1.25;
        state.painted[3] = true;

        let dir = std::env::temp_dir().join(format!(
            "texgen_state_test_{}",
            std::process::id()
        ));
        state.save(&dir, "mesh").unwrap();
        let loaded = TextureState::load(&dir, "mesh", 8).unwrap();

        assert_eq!(loaded.painted, state.painted);
        assert_eq_f64!(loaded.colors[3][0], 200.0);
        assert_eq_f64!(loaded.weights[3], 1.25, 1.0 / WEIGHT_SCALE);

        assert!(TextureState::load(&dir, "mesh", 16).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
