use std::path::{Path, PathBuf};

use serde::Deserialize;

use base::defs::{Error, ErrorKind::*, Result};
use base::util::fs;

use crate::view::View;

/// The five generation-mode policies. They share one pipeline and differ
/// in view ordering and mask construction.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Separate,
    Sequential,
    Grid,
    Refine,
    UvInpaint,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MeshConfig {
    pub name: String,
    pub path: PathBuf,
    /// Object-specific prompt, used when no view prompt applies.
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WeightingConfig {
    /// Facing angle in degrees beyond which a view's contribution to a
    /// surface point is forced to zero.
    pub discard_over_angle_deg: f64,
    /// Falloff sharpness: weight = max(0, cos θ)^exponent.
    pub exponent: f64,
}

impl Default for WeightingConfig {
    fn default() -> Self {
        WeightingConfig {
            discard_over_angle_deg: 90.0,
            exponent: 3.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    /// Smooth (graded) visibility ramp for sequential masks; when off, the
    /// binary threshold applies instead.
    pub smooth: bool,
    pub ramp_black: f64,
    pub ramp_white: f64,
    pub binary_threshold: f64,
    pub grow_by: u32,
    pub blur_radius: u32,
    pub blur_sigma: f64,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        MaskingConfig {
            smooth: true,
            ramp_black: 0.15,
            ramp_white: 1.0,
            binary_threshold: 0.7,
            grow_by: 3,
            blur_radius: 1,
            blur_sigma: 1.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoraUnit {
    pub model: String,
    #[serde(default = "default_strength")]
    pub model_strength: f64,
    #[serde(default = "default_strength")]
    pub clip_strength: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ControlNetUnit {
    /// Guidance kind the unit consumes: "depth", "normal" or "edge".
    pub kind: String,
    pub model: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub start_percent: f64,
    #[serde(default = "default_strength")]
    pub end_percent: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IpAdapterConfig {
    pub reference: PathBuf,
    #[serde(default = "default_ipadapter_weight_type")]
    pub weight_type: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub start_percent: f64,
    #[serde(default = "default_strength")]
    pub end_percent: f64,
}

fn default_strength() -> f64 {
    1.0
}

fn default_ipadapter_weight_type() -> String {
    "style".to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Fixed seed; when absent each view draws a random one.
    pub seed: Option<u64>,
    pub steps: u32,
    pub cfg: f64,
    pub sampler: String,
    pub scheduler: String,
    pub denoise: f64,
    pub canny_low: u8,
    pub canny_high: u8,
    pub loras: Vec<LoraUnit>,
    pub control_nets: Vec<ControlNetUnit>,
    pub ip_adapter: Option<IpAdapterConfig>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            seed: None,
            steps: 8,
            cfg: 1.5,
            sampler: "dpmpp_2s_ancestral".to_string(),
            scheduler: "sgm_uniform".to_string(),
            denoise: 1.0,
            canny_low: 0,
            canny_high: 80,
            loras: vec![],
            control_nets: vec![],
            ip_adapter: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub enabled: bool,
    pub steps: u32,
    pub cfg: f64,
    pub denoise: f64,
    pub prompt: Option<String>,
    /// Grayscale image marking canvas regions to preserve; the generation
    /// mask is its inverse. Whole canvas is regenerated when absent.
    pub preserve_mask: Option<PathBuf>,
    /// When preservation is off entirely, refine overwrites instead of
    /// weighted-blending.
    pub preserve_original: bool,
}

impl Default for RefineConfig {
    fn default() -> Self {
        RefineConfig {
            enabled: false,
            steps: 8,
            cfg: 1.5,
            denoise: 0.4,
            prompt: None,
            preserve_mask: None,
            preserve_original: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case", tag = "layout")]
pub enum GridLayout {
    /// Near-square tiling computed from the view count.
    Auto,
    Fixed { rows: u32, cols: u32 },
}

impl Default for GridLayout {
    fn default() -> Self {
        GridLayout::Auto
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    #[serde(flatten)]
    pub layout: GridLayout,
    /// Optional second pass re-submitting the composited result at lower
    /// denoising strength.
    pub refine_pass: bool,
    pub refine_denoise: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            layout: GridLayout::Auto,
            refine_pass: false,
            refine_denoise: 0.4,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BakeConfig {
    pub enabled: bool,
    pub resolution: u32,
    pub gutter: u32,
}

impl Default for BakeConfig {
    fn default() -> Self {
        BakeConfig {
            enabled: false,
            resolution: 2048,
            gutter: 4,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub address: String,
    pub timeout_sec: u64,
    pub poll_interval_ms: u64,
    /// The backend queues internally; keep dispatch serialized unless it
    /// is known to serve parallel requests.
    pub concurrent_requests: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            address: "http://127.0.0.1:8188".to_string(),
            timeout_sec: 600,
            poll_interval_ms: 500,
            concurrent_requests: false,
        }
    }
}

/// Immutable configuration of one generation run.
#[derive(Clone, Debug, Deserialize)]
pub struct RunConfig {
    pub mode: Mode,
    pub meshes: Vec<MeshConfig>,
    pub views: Vec<View>,
    pub output_dir: PathBuf,

    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    /// Concatenate the global prompt after view/object prompts.
    #[serde(default = "default_true")]
    pub concat_global_prompt: bool,

    #[serde(default)]
    pub weighting: WeightingConfig,
    #[serde(default)]
    pub masking: MaskingConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub refine: RefineConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub bake: BakeConfig,
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default = "default_canvas_resolution")]
    pub canvas_resolution: u32,
    #[serde(default = "default_texture_resolution")]
    pub texture_resolution: u32,
    #[serde(default = "default_fallback_color")]
    pub fallback_color: [f64; 3],
    #[serde(default)]
    pub custom_order: Option<Vec<usize>>,
    /// First view index to process; earlier views are assumed committed in
    /// the persisted texture state.
    #[serde(default)]
    pub resume_from: usize,
}

fn default_true() -> bool {
    true
}

fn default_canvas_resolution() -> u32 {
    1024
}

fn default_texture_resolution() -> u32 {
    1024
}

fn default_fallback_color() -> [f64; 3] {
    [0.5, 0.5, 0.5]
}

impl RunConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
        let data = fs::read_file_to_string(&path)?;
        let config: RunConfig = serde_json::from_str(&data).map_err(|e| {
            Error::with_source(
                MalformedData,
                format!(
                    "failed to parse run configuration '{}'",
                    path.as_ref().display()
                ),
                e,
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |desc: String| Err(Error::new(Configuration, desc));

        if self.meshes.is_empty() {
            return fail("no meshes configured".to_string());
        }
        if self.views.is_empty() && self.mode != Mode::UvInpaint {
            return fail("no views configured".to_string());
        }
        if self.canvas_resolution == 0 || self.texture_resolution == 0 {
            return fail("resolutions must be positive".to_string());
        }
        if !(0.0..=180.0).contains(&self.weighting.discard_over_angle_deg) {
            return fail(format!(
                "discard angle {} outside [0, 180]",
                self.weighting.discard_over_angle_deg
            ));
        }
        if self.weighting.exponent <= 0.0 {
            return fail(format!(
                "weight exponent {} must be positive",
                self.weighting.exponent
            ));
        }
        if self.masking.ramp_white <= self.masking.ramp_black {
            return fail("mask ramp white point must exceed black".to_string());
        }
        if let GridLayout::Fixed { rows, cols } = self.grid.layout {
            if (rows * cols) as usize > 0
                && ((rows * cols) as usize) < self.views.len()
            {
                return fail(format!(
                    "grid layout {}x{} cannot hold {} views",
                    rows,
                    cols,
                    self.views.len()
                ));
            }
            if rows == 0 || cols == 0 {
                return fail("grid layout must be non-empty".to_string());
            }
        }
        if self.resume_from > self.views.len() {
            return fail(format!(
                "resume index {} exceeds view count {}",
                self.resume_from,
                self.views.len()
            ));
        }
        if let Some(order) = &self.custom_order {
            crate::view::resolve_view_order(self.views.len(), Some(order))?;
        }

        Ok(())
    }

    /// Prompt for one view of one mesh: view override first, then the
    /// object prompt, then the global prompt; the global prompt is
    /// appended when concatenation is enabled.
    pub fn prompt_for(&self, mesh: &MeshConfig, view: Option<&View>) -> String {
        self.assemble_prompt(
            view.and_then(|v| v.prompt.clone())
                .or_else(|| mesh.prompt.clone()),
        )
    }

    /// Prompt for a whole-scene pass, where object prompts do not apply.
    pub fn scene_prompt(&self, view: Option<&View>) -> String {
        self.assemble_prompt(view.and_then(|v| v.prompt.clone()))
    }

    fn assemble_prompt(&self, specific: Option<String>) -> String {
        match specific {
            Some(specific) if self.concat_global_prompt
                && !self.prompt.is_empty() =>
            {
                format!("{}, {}", specific, self.prompt)
            }
            Some(specific) => specific,
            None => self.prompt.clone(),
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    use crate::view::test::new_top_view;

    pub fn new_run_config(mode: Mode, view_count: usize) -> RunConfig {
        let views = (0..view_count).map(|_| new_top_view(2.0)).collect();
        serde_json::from_str::<RunConfig>(
            r#"{
                "mode": "separate",
                "meshes": [{"name": "quad", "path": "quad.obj"}],
                "views": [],
                "output_dir": "out"
            }"#,
        )
        .map(|mut config| {
            config.mode = mode;
            config.views = views;
            config
        })
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = new_run_config(Mode::Separate, 2);
        assert_eq!(config.weighting.discard_over_angle_deg, 90.0);
        assert_eq!(config.weighting.exponent, 3.0);
        assert_eq!(config.canvas_resolution, 1024);
        assert_eq!(config.fallback_color, [0.5, 0.5, 0.5]);
        assert!(!config.backend.concurrent_requests);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_views() {
        let config = new_run_config(Mode::Sequential, 0);
        assert!(config.validate().is_err());

        // UV inpainting needs no camera views.
        let config = new_run_config(Mode::UvInpaint, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_grid() {
        let mut config = new_run_config(Mode::Grid, 5);
        config.grid.layout = GridLayout::Fixed { rows: 2, cols: 2 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        let mode: Mode = serde_json::from_str("\"uv_inpaint\"").unwrap();
        assert_eq!(mode, Mode::UvInpaint);
    }

    #[test]
    fn test_prompt_assembly() {
        let mut config = new_run_config(Mode::Separate, 1);
        config.prompt = "studio lighting".to_string();
        config.meshes[0].prompt = Some("rusty barrel".to_string());

        assert_eq!(
            config.prompt_for(&config.meshes[0], None),
            "rusty barrel, studio lighting"
        );

        let mut view = config.views[0].clone();
        view.prompt = Some("barrel top".to_string());
        assert_eq!(
            config.prompt_for(&config.meshes[0], Some(&view)),
            "barrel top, studio lighting"
        );

        config.concat_global_prompt = false;
        assert_eq!(
            config.prompt_for(&config.meshes[0], None),
            "rusty barrel"
        );

        config.meshes[0].prompt = None;
        assert_eq!(
            config.prompt_for(&config.meshes[0], None),
            "studio lighting"
        );
    }
}
