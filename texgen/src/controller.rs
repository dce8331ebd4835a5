use std::path::PathBuf;
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use log::{debug, info, warn};
use rayon::prelude::*;

use base::defs::{Error, ErrorKind::*, Result};
use base::util::fs;
use base::util::sync::CancelToken;

use crate::backend::{
    self, GenerationService, GuidancePaths, ProgressEvent,
};
use crate::baker;
use crate::compositor::{
    composite_overwrite, composite_uv_direct, composite_view,
    render_coverage, render_state_preview,
};
use crate::config::{GridLayout, Mode, RunConfig};
use crate::mask::{
    full_canvas_mask, refine_mask, sequential_mask, uv_inpaint_mask,
};
use crate::mesh::{import_obj, Mesh};
use crate::misc::Vector3;
use crate::projection::{
    rasterize_texel_surfaces, render_pixel_weights, sample_view,
    GuidanceBundle, TexelSurface, ViewSample,
};
use crate::state::TextureState;
use crate::view::{resolve_view_order, View};

/// Observable phase of a run. Transitions are strictly forward; a failed
/// or cancelled run simply stops in whatever phase it reached, with the
/// texture state of every committed view already on disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    Idle,
    Preparing,
    GeneratingView(usize),
    GeneratingGrid,
    Refining,
    InpaintingUv,
    Baking,
    Done,
}

/// Scene data loaded once per run and shared by all views.
pub struct PreparedScene {
    pub meshes: Vec<Mesh>,
    pub surfaces: Vec<Vec<Option<TexelSurface>>>,
    pub states: Vec<TextureState>,
}

/// Per-call sampler parameters; refine passes override the defaults.
struct PassParams {
    prompt: String,
    steps: u32,
    cfg: f64,
    denoise: f64,
}

/// Drives one generation run end to end: scene preparation, the
/// mode-specific view loop with backend calls and compositing commits,
/// and finalization. Texture state is persisted after every commit, so
/// an interrupted run resumes from the first uncommitted view.
pub struct Controller<'a> {
    config: &'a RunConfig,
    service: &'a dyn GenerationService,
    cancel: CancelToken,
    state: RunState,
}

impl<'a> Controller<'a> {
    pub fn new(
        config: &'a RunConfig,
        service: &'a dyn GenerationService,
        cancel: CancelToken,
    ) -> Self {
        Controller {
            config,
            service,
            cancel,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn enter(&mut self, state: RunState) {
        debug!("run state: {:?}", state);
        self.state = state;
    }

    pub fn run(&mut self) -> Result<()> {
        self.enter(RunState::Preparing);
        let mut scene = self.prepare()?;

        let result = match self.config.mode {
            Mode::Separate => self.run_separate(&mut scene),
            Mode::Sequential => self.run_sequential(&mut scene),
            Mode::Grid => self.run_grid(&mut scene),
            Mode::Refine => self.run_refine(&mut scene),
            Mode::UvInpaint => self.run_uv_inpaint(&mut scene),
        };

        if let Err(err) = result {
            // An aborted run still yields usable textures with the
            // fallback color in never-painted texels. The persisted
            // state pair is left as committed so a retry can resume.
            for (mesh, state) in scene.meshes.iter().zip(&scene.states) {
                let mut filled = state.clone();
                filled.fill_fallback(self.fallback());
                if let Err(save_err) = self.save_texture(&mesh.name, &filled)
                {
                    warn!("{}", save_err);
                }
            }
            return Err(err);
        }

        self.finalize(&mut scene)?;
        self.enter(RunState::Done);
        Ok(())
    }

    pub fn prepare(&self) -> Result<PreparedScene> {
        fs::ensure_dir(&self.config.output_dir)?;
        self.service.probe()?;

        let mut meshes = vec![];
        for mesh_config in &self.config.meshes {
            info!("importing mesh '{}'...", mesh_config.name);
            let mesh = import_obj(&mesh_config.name, &mesh_config.path)?;
            if mesh.has_degenerate_uvs() {
                warn!(
                    "skipping mesh '{}' with a degenerate UV chart",
                    mesh.name
                );
                continue;
            }
            meshes.push(mesh);
        }
        if meshes.is_empty() {
            return Err(Error::new(
                Geometry,
                "no meshes with a usable UV chart".to_string(),
            ));
        }

        info!("rasterizing texel surfaces...");
        let resolution = self.config.texture_resolution;
        let surfaces = meshes
            .iter()
            .map(|mesh| rasterize_texel_surfaces(mesh, resolution))
            .collect();

        let resumes = matches!(self.config.mode, Mode::Refine | Mode::UvInpaint)
            || self.config.resume_from > 0;
        let states = if resumes {
            meshes
                .iter()
                .map(|mesh| {
                    TextureState::load(
                        &self.config.output_dir,
                        &mesh.name,
                        resolution,
                    )
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            meshes
                .iter()
                .map(|_| TextureState::new(resolution))
                .collect()
        };

        Ok(PreparedScene {
            meshes,
            surfaces,
            states,
        })
    }

    fn fallback(&self) -> Vector3 {
        let [r, g, b] = self.config.fallback_color;
        Vector3::new(r, g, b) * 255.0
    }

    fn default_params(&self, view: Option<&View>) -> PassParams {
        PassParams {
            prompt: self.config.scene_prompt(view),
            steps: self.config.sampler.steps,
            cfg: self.config.sampler.cfg,
            denoise: self.config.sampler.denoise,
        }
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    fn save_rgb(&self, image: &RgbImage, name: &str) -> Result<PathBuf> {
        let path = self.artifact_path(name);
        image.save(&path).map_err(|e| {
            Error::with_source(
                IoError,
                format!("failed to write '{}'", path.display()),
                e,
            )
        })?;
        Ok(path)
    }

    fn save_gray(&self, image: &GrayImage, name: &str) -> Result<PathBuf> {
        let path = self.artifact_path(name);
        image.save(&path).map_err(|e| {
            Error::with_source(
                IoError,
                format!("failed to write '{}'", path.display()),
                e,
            )
        })?;
        Ok(path)
    }

    /// Saves the call's input images, submits the request and waits for
    /// the generated image. Checks for cancellation once more after the
    /// call so a late result is never committed.
    #[allow(clippy::too_many_arguments)]
    fn request_generation(
        &self,
        tag: &str,
        width: u32,
        height: u32,
        guidance: Option<&GuidanceBundle>,
        mask: &GrayImage,
        init: Option<&RgbImage>,
        params: &PassParams,
    ) -> Result<RgbImage> {
        let guidance_paths = match guidance {
            Some(bundle) => Some(GuidancePaths {
                depth: self
                    .save_rgb(&bundle.depth, &format!("{}_depth.png", tag))?,
                normal: self
                    .save_rgb(&bundle.normal, &format!("{}_normal.png", tag))?,
                edge: self
                    .save_rgb(&bundle.edge, &format!("{}_edge.png", tag))?,
            }),
            None => None,
        };
        let mask_path = self.save_gray(mask, &format!("{}_mask.png", tag))?;
        let init_path = match init {
            Some(image) => {
                Some(self.save_rgb(image, &format!("{}_init.png", tag))?)
            }
            None => None,
        };

        let seed = backend::resolve_seed(self.config);
        let mut request = backend::build_request(
            self.config,
            params.prompt.clone(),
            seed,
            width,
            height,
            guidance_paths.as_ref(),
            Some(mask_path),
            init_path,
        );
        request.steps = params.steps;
        request.cfg = params.cfg;
        request.denoise = params.denoise;

        info!("generating '{}' with seed {}...", tag, seed);
        let image = self.service.generate(
            &request,
            &mut |event| {
                if let ProgressEvent::Sampling { step, total } = event {
                    debug!("'{}': sampling step {}/{}", tag, step, total);
                }
            },
            &self.cancel,
        )?;
        self.cancel.ensure_active()?;

        // Kept on disk so a finished run can be re-projected later.
        self.save_rgb(&image, &format!("{}_generated.png", tag))?;
        Ok(image)
    }

    fn save_texture(
        &self,
        mesh_name: &str,
        state: &TextureState,
    ) -> Result<()> {
        let path = self.artifact_path(&format!("{}_texture.png", mesh_name));
        state.color_image().save(&path).map_err(|e| {
            Error::with_source(
                IoError,
                format!("failed to write '{}'", path.display()),
                e,
            )
        })
    }

    fn save_states(
        &self,
        meshes: &[Mesh],
        states: &[TextureState],
    ) -> Result<()> {
        for (mesh, state) in meshes.iter().zip(states) {
            state.save(&self.config.output_dir, &mesh.name)?;
        }
        Ok(())
    }

    /// Blends one generated view into every mesh's texture state and
    /// persists the result as a single commit.
    fn commit_view(
        &self,
        meshes: &[Mesh],
        states: &mut [TextureState],
        image: &RgbImage,
        sample: &ViewSample,
    ) -> Result<()> {
        for (state, field) in states.iter_mut().zip(&sample.weights) {
            composite_view(state, image, field);
        }
        self.save_states(meshes, states)
    }

    fn generate_separate_view(
        &self,
        scene: &PreparedScene,
        view_idx: usize,
    ) -> Result<(RgbImage, ViewSample)> {
        let view = &self.config.views[view_idx];
        let res = self.config.canvas_resolution;
        let sample = self.sample(scene, view);
        let mask = full_canvas_mask(res, res);
        let params = self.default_params(Some(view));

        let image = self.request_generation(
            &format!("view_{}", view_idx),
            res,
            res,
            Some(&sample.guidance),
            &mask,
            None,
            &params,
        )?;
        Ok((image, sample))
    }

    fn sample(&self, scene: &PreparedScene, view: &View) -> ViewSample {
        let res = self.config.canvas_resolution;
        sample_view(
            &scene.meshes,
            &scene.surfaces,
            view,
            res,
            res,
            self.config.texture_resolution,
            &self.config.weighting,
            self.config.sampler.canny_low,
            self.config.sampler.canny_high,
        )
    }

    /// Separate mode: every view generated against guidance alone, then
    /// blended by confidence. View results are independent, so dispatch
    /// may be concurrent; commits stay serialized either way.
    fn run_separate(&mut self, scene: &mut PreparedScene) -> Result<()> {
        let view_idxs: Vec<usize> =
            (self.config.resume_from..self.config.views.len()).collect();

        if self.config.backend.concurrent_requests {
            let states = Mutex::new(std::mem::take(&mut scene.states));
            let this: &Controller = self;
            let result = view_idxs.par_iter().try_for_each(|&view_idx| {
                this.cancel.ensure_active()?;
                let (image, sample) =
                    this.generate_separate_view(scene, view_idx)?;
                let mut states = states.lock().unwrap();
                this.commit_view(&scene.meshes, &mut states, &image, &sample)
            });
            scene.states = states.into_inner().unwrap();
            result
        } else {
            for &view_idx in &view_idxs {
                self.enter(RunState::GeneratingView(view_idx));
                self.cancel.ensure_active()?;
                let (image, sample) =
                    self.generate_separate_view(scene, view_idx)?;
                self.commit_view(
                    &scene.meshes,
                    &mut scene.states,
                    &image,
                    &sample,
                )?;
            }
            Ok(())
        }
    }

    /// Sequential mode: views processed in order, each seeing a preview
    /// of the texture so far and an inpainting mask that protects
    /// regions earlier views already covered well.
    fn run_sequential(&mut self, scene: &mut PreparedScene) -> Result<()> {
        let order = resolve_view_order(
            self.config.views.len(),
            self.config.custom_order.as_deref(),
        )?;
        let res = self.config.canvas_resolution;

        for &view_idx in order.iter().skip(self.config.resume_from) {
            self.enter(RunState::GeneratingView(view_idx));
            self.cancel.ensure_active()?;

            let view = &self.config.views[view_idx];
            let sample = self.sample(scene, view);

            let surface: Vec<bool> = sample
                .gbuffer
                .depth
                .iter()
                .map(|d| d.is_finite())
                .collect();
            let coverage = render_coverage(&sample.gbuffer, &scene.states);
            let pixel_weights = render_pixel_weights(
                &sample.gbuffer,
                view,
                &self.config.weighting,
            );
            let mask = sequential_mask(
                res,
                res,
                &surface,
                &coverage,
                &pixel_weights,
                &self.config.masking,
            );
            let init = render_state_preview(
                &sample.gbuffer,
                &scene.states,
                self.fallback(),
            );

            let params = self.default_params(Some(view));
            let image = self.request_generation(
                &format!("view_{}", view_idx),
                res,
                res,
                Some(&sample.guidance),
                &mask,
                Some(&init),
                &params,
            )?;
            self.commit_view(
                &scene.meshes,
                &mut scene.states,
                &image,
                &sample,
            )?;
        }
        Ok(())
    }

    /// Grid mode: all views tiled into one canvas and generated in a
    /// single call for cross-view consistency, then sliced apart and
    /// blended per view.
    fn run_grid(&mut self, scene: &mut PreparedScene) -> Result<()> {
        self.enter(RunState::GeneratingGrid);
        self.cancel.ensure_active()?;

        let order = resolve_view_order(
            self.config.views.len(),
            self.config.custom_order.as_deref(),
        )?;
        let (rows, cols) =
            grid_dimensions(&self.config.grid.layout, order.len());
        let tile = self.config.canvas_resolution / cols;
        if tile == 0 {
            return Err(Error::new(
                Configuration,
                format!(
                    "canvas resolution {} cannot hold {} grid columns",
                    self.config.canvas_resolution, cols
                ),
            ));
        }
        let (width, height) = (cols * tile, rows * tile);

        let mut depth = RgbImage::new(width, height);
        let mut normal =
            RgbImage::from_pixel(width, height, Rgb([128, 128, 255]));
        let mut edge = RgbImage::new(width, height);
        let mut samples = Vec::with_capacity(order.len());

        for (cell, &view_idx) in order.iter().enumerate() {
            let view = &self.config.views[view_idx];
            let sample = sample_view(
                &scene.meshes,
                &scene.surfaces,
                view,
                tile,
                tile,
                self.config.texture_resolution,
                &self.config.weighting,
                self.config.sampler.canny_low,
                self.config.sampler.canny_high,
            );

            let (x, y) = grid_cell_origin(cell, cols, tile);
            imageops::replace(&mut depth, &sample.guidance.depth, x, y);
            imageops::replace(&mut normal, &sample.guidance.normal, x, y);
            imageops::replace(&mut edge, &sample.guidance.edge, x, y);
            samples.push(sample);
        }

        let guidance = GuidanceBundle {
            depth,
            normal,
            edge,
        };
        let mask = full_canvas_mask(width, height);
        let params = self.default_params(None);
        let image = self.request_generation(
            "grid",
            width,
            height,
            Some(&guidance),
            &mask,
            None,
            &params,
        )?;
        self.commit_grid(scene, &image, &samples, rows, cols, tile)?;

        if self.config.grid.refine_pass {
            self.enter(RunState::Refining);
            self.cancel.ensure_active()?;

            let mut init = RgbImage::new(width, height);
            for (cell, sample) in samples.iter().enumerate() {
                let preview = render_state_preview(
                    &sample.gbuffer,
                    &scene.states,
                    self.fallback(),
                );
                let (x, y) = grid_cell_origin(cell, cols, tile);
                imageops::replace(&mut init, &preview, x, y);
            }

            let mut params = self.default_params(None);
            params.denoise = self.config.grid.refine_denoise;
            let image = self.request_generation(
                "grid_refine",
                width,
                height,
                Some(&guidance),
                &mask,
                Some(&init),
                &params,
            )?;
            self.commit_grid(scene, &image, &samples, rows, cols, tile)?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_grid(
        &self,
        scene: &mut PreparedScene,
        image: &RgbImage,
        samples: &[ViewSample],
        rows: u32,
        cols: u32,
        tile: u32,
    ) -> Result<()> {
        let expected = (cols * tile, rows * tile);
        if image.dimensions() != expected {
            return Err(Error::new(
                Backend,
                format!(
                    "grid result is {}x{}, expected {}x{}",
                    image.width(),
                    image.height(),
                    expected.0,
                    expected.1
                ),
            ));
        }

        for (cell, sample) in samples.iter().enumerate() {
            let (x, y) = grid_cell_origin(cell, cols, tile);
            let tile_image = imageops::crop_imm(
                image,
                x as u32,
                y as u32,
                tile,
                tile,
            )
            .to_image();
            for (state, field) in
                scene.states.iter_mut().zip(&sample.weights)
            {
                composite_view(state, &tile_image, field);
            }
        }
        self.save_states(&scene.meshes, &scene.states)
    }

    /// Refine mode: re-generates each view at partial denoising strength
    /// on top of the existing texture, optionally keeping a preserved
    /// region untouched.
    fn run_refine(&mut self, scene: &mut PreparedScene) -> Result<()> {
        let res = self.config.canvas_resolution;
        let preserve = match &self.config.refine.preserve_mask {
            Some(path) => {
                let image = image::open(path)
                    .map_err(|e| {
                        Error::with_source(
                            IoError,
                            format!(
                                "failed to read preserve mask '{}'",
                                path.display()
                            ),
                            e,
                        )
                    })?
                    .into_luma8();
                Some(imageops::resize(
                    &image,
                    res,
                    res,
                    FilterType::Triangle,
                ))
            }
            None => None,
        };

        let order = resolve_view_order(
            self.config.views.len(),
            self.config.custom_order.as_deref(),
        )?;

        for &view_idx in order.iter().skip(self.config.resume_from) {
            self.enter(RunState::GeneratingView(view_idx));
            self.cancel.ensure_active()?;

            let view = &self.config.views[view_idx];
            let sample = self.sample(scene, view);
            let mask = refine_mask(res, res, preserve.as_ref());
            let init = render_state_preview(
                &sample.gbuffer,
                &scene.states,
                self.fallback(),
            );

            let params = PassParams {
                prompt: self
                    .config
                    .refine
                    .prompt
                    .clone()
                    .unwrap_or_else(|| self.config.scene_prompt(Some(view))),
                steps: self.config.refine.steps,
                cfg: self.config.refine.cfg,
                denoise: self.config.refine.denoise,
            };
            let image = self.request_generation(
                &format!("refine_{}", view_idx),
                res,
                res,
                Some(&sample.guidance),
                &mask,
                Some(&init),
                &params,
            )?;

            if self.config.refine.preserve_original {
                self.commit_view(
                    &scene.meshes,
                    &mut scene.states,
                    &image,
                    &sample,
                )?;
            } else {
                for (state, field) in
                    scene.states.iter_mut().zip(&sample.weights)
                {
                    composite_overwrite(state, &image, field);
                }
                self.save_states(&scene.meshes, &scene.states)?;
            }
        }
        Ok(())
    }

    /// UV-inpaint mode: fills texels no view ever painted directly in
    /// texture space, one call per mesh.
    fn run_uv_inpaint(&mut self, scene: &mut PreparedScene) -> Result<()> {
        self.enter(RunState::InpaintingUv);
        let res = self.config.texture_resolution;
        let fallback = self.fallback();

        for mesh_idx in 0..scene.meshes.len() {
            self.cancel.ensure_active()?;
            let mesh_name = scene.meshes[mesh_idx].name.clone();

            let mask = uv_inpaint_mask(
                &scene.surfaces[mesh_idx],
                &scene.states[mesh_idx],
            );
            if mask.pixels().all(|p| p[0] == 0) {
                info!("mesh '{}' has no unpainted texels", mesh_name);
                continue;
            }

            let state = &scene.states[mesh_idx];
            let mut init = RgbImage::new(res, res);
            for i in 0..res {
                for j in 0..res {
                    let idx = state.idx(i, j);
                    let color = if state.painted[idx] {
                        state.colors[idx]
                    } else {
                        fallback
                    };
                    crate::misc::set_pixel_ij_as_vector3(
                        i, j, color, &mut init,
                    );
                }
            }

            let prompt = self
                .config
                .meshes
                .iter()
                .find(|m| m.name == mesh_name)
                .map(|m| self.config.prompt_for(m, None))
                .unwrap_or_else(|| self.config.prompt.clone());
            let params = PassParams {
                prompt,
                ..self.default_params(None)
            };

            let image = self.request_generation(
                &format!("uv_inpaint_{}", mesh_name),
                res,
                res,
                None,
                &mask,
                Some(&init),
                &params,
            )?;

            let state = &mut scene.states[mesh_idx];
            composite_uv_direct(state, &image, &mask);
            state.save(&self.config.output_dir, &mesh_name)?;
        }
        Ok(())
    }

    /// Fills never-painted texels with the fallback color, writes the
    /// final textures and optionally bakes them at output resolution.
    fn finalize(&mut self, scene: &mut PreparedScene) -> Result<()> {
        let fallback = self.fallback();

        for (mesh, state) in
            scene.meshes.iter().zip(scene.states.iter_mut())
        {
            state.fill_fallback(fallback);
            state.save(&self.config.output_dir, &mesh.name)?;
            self.save_texture(&mesh.name, state)?;
        }

        if self.config.bake.enabled {
            self.enter(RunState::Baking);
            for (mesh, state) in scene.meshes.iter().zip(&scene.states) {
                self.cancel.ensure_active()?;
                info!(
                    "baking '{}' at {}x{}...",
                    mesh.name,
                    self.config.bake.resolution,
                    self.config.bake.resolution
                );
                let baked = baker::bake(
                    state,
                    self.config.bake.resolution,
                    self.config.bake.gutter,
                    fallback,
                );
                self.save_rgb(&baked, &format!("{}_baked.png", mesh.name))?;
            }
        }

        Ok(())
    }
}

/// Near-square tiling for the automatic layout.
pub fn grid_dimensions(layout: &GridLayout, view_count: usize) -> (u32, u32) {
    match *layout {
        GridLayout::Fixed { rows, cols } => (rows, cols),
        GridLayout::Auto => {
            let cols = ((view_count as f64).sqrt().ceil() as u32).max(1);
            let rows = ((view_count as u32 + cols - 1) / cols).max(1);
            (rows, cols)
        }
    }
}

fn grid_cell_origin(cell: usize, cols: u32, tile: u32) -> (i64, i64) {
    let row = cell as u32 / cols;
    let col = cell as u32 % cols;
    ((col * tile) as i64, (row * tile) as i64)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::path::PathBuf;

    use base::assert_eq_f64;

    use crate::backend::test::MockGenerationService;
    use crate::config::{test::new_run_config, Mode};
    use crate::mesh::test::new_quad;

    const RES: u32 = 32;

    fn temp_out(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("texgen_run_{}_{}", tag, std::process::id()))
    }

    fn test_config(tag: &str, mode: Mode, view_count: usize) -> RunConfig {
        let mut config = new_run_config(mode, view_count);
        config.canvas_resolution = RES;
        config.texture_resolution = RES;
        config.output_dir = temp_out(tag);
        fs::ensure_dir(&config.output_dir).unwrap();
        config
    }

    fn test_scene(config: &RunConfig) -> PreparedScene {
        let mesh = new_quad("quad");
        let surfaces =
            vec![rasterize_texel_surfaces(&mesh, config.texture_resolution)];
        let states = vec![TextureState::new(config.texture_resolution)];
        PreparedScene {
            meshes: vec![mesh],
            surfaces,
            states,
        }
    }

    fn solid(res: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(res, res, Rgb(color))
    }

    fn cleanup(config: &RunConfig) {
        std::fs::remove_dir_all(&config.output_dir).unwrap();
    }

    #[test]
    fn test_separate_single_view_paints_exact_color() {
        let mut config = test_config("separate", Mode::Separate, 1);
        config.prompt = "weathered brick".to_string();
        let service = MockGenerationService::new();
        service.push_image(solid(RES, [10, 200, 30]));

        let mut controller =
            Controller::new(&config, &service, CancelToken::new());
        let mut scene = test_scene(&config);
        controller.run_separate(&mut scene).unwrap();

        let state = &scene.states[0];
        assert!(state.painted_count() > 0);
        let center = state.idx(RES / 2, RES / 2);
        assert!(state.painted[center]);
        assert_eq_f64!(state.colors[center][0], 10.0, 1e-6);
        assert_eq_f64!(state.colors[center][1], 200.0, 1e-6);

        let requests = service.take_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, "weathered brick");
        assert_eq!(requests[0].width, RES);

        cleanup(&config);
    }

    #[test]
    fn test_sequential_failure_preserves_committed_views() {
        let config = test_config("seq_fail", Mode::Sequential, 2);
        let service = MockGenerationService::new();
        // Returns are popped in reverse: first view succeeds, second fails.
        service.push_failure("backend went away");
        service.push_image(solid(RES, [200, 0, 0]));

        let mut controller =
            Controller::new(&config, &service, CancelToken::new());
        let mut scene = test_scene(&config);
        let err = controller.run_sequential(&mut scene).unwrap_err();
        assert_eq!(err.kind, Backend);
        assert_eq!(controller.state(), RunState::GeneratingView(1));

        // The first view's commit survived on disk.
        let loaded =
            TextureState::load(&config.output_dir, "quad", RES).unwrap();
        let painted_after_one = loaded.painted_count();
        assert!(painted_after_one > 0);
        service.take_requests();

        // Resuming skips the committed view and completes the run.
        let mut resumed = config.clone();
        resumed.resume_from = 1;
        let service = MockGenerationService::new();
        service.push_image(solid(RES, [0, 0, 200]));

        let mut controller =
            Controller::new(&resumed, &service, CancelToken::new());
        let mut scene = test_scene(&resumed);
        scene.states = vec![loaded];
        controller.run_sequential(&mut scene).unwrap();

        assert!(scene.states[0].painted_count() >= painted_after_one);
        assert_eq!(service.take_requests().len(), 1);

        cleanup(&config);
    }

    #[test]
    fn test_cancellation_commits_nothing() {
        let config = test_config("cancel", Mode::Sequential, 2);
        let service = MockGenerationService::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut controller = Controller::new(&config, &service, cancel);
        let mut scene = test_scene(&config);
        let err = controller.run_sequential(&mut scene).unwrap_err();
        assert_eq!(err.kind, Cancelled);
        assert_eq!(scene.states[0].painted_count(), 0);
        assert!(service.take_requests().is_empty());

        cleanup(&config);
    }

    #[test]
    fn test_grid_single_call_covers_all_views() {
        let mut config = test_config("grid", Mode::Grid, 4);
        config.canvas_resolution = 2 * RES;
        let service = MockGenerationService::new();
        service.push_image(solid(2 * RES, [50, 60, 70]));

        let mut controller =
            Controller::new(&config, &service, CancelToken::new());
        let mut scene = test_scene(&config);
        controller.run_grid(&mut scene).unwrap();

        let state = &scene.states[0];
        let center = state.idx(RES / 2, RES / 2);
        assert!(state.painted[center]);
        // Four identical views blend to the tile color itself.
        assert_eq_f64!(state.colors[center][2], 70.0, 1e-6);

        let requests = service.take_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].width, 2 * RES);
        assert_eq!(requests[0].height, 2 * RES);

        cleanup(&config);
    }

    #[test]
    fn test_uv_inpaint_fills_only_unpainted_texels() {
        let config = test_config("uv", Mode::UvInpaint, 0);
        let service = MockGenerationService::new();
        service.push_image(solid(RES, [90, 90, 90]));

        let mut controller =
            Controller::new(&config, &service, CancelToken::new());
        let mut scene = test_scene(&config);
        let center = scene.states[0].idx(RES / 2, RES / 2);
        scene.states[0].colors[center] = Vector3::new(7.0, 7.0, 7.0);
        scene.states[0].painted[center] = true;

        controller.run_uv_inpaint(&mut scene).unwrap();

        let state = &scene.states[0];
        assert_eq_f64!(state.colors[center][0], 7.0);
        assert_eq_f64!(state.colors[0][0], 90.0);
        assert!(state.painted_count() > 1);
        service.take_requests();

        cleanup(&config);
    }

    #[test]
    fn test_grid_dimensions() {
        assert_eq!(grid_dimensions(&GridLayout::Auto, 1), (1, 1));
        assert_eq!(grid_dimensions(&GridLayout::Auto, 3), (2, 2));
        assert_eq!(grid_dimensions(&GridLayout::Auto, 9), (3, 3));
        assert_eq!(
            grid_dimensions(&GridLayout::Fixed { rows: 1, cols: 4 }, 4),
            (1, 4)
        );
    }

    #[test]
    fn test_full_run_with_prepare_and_finalize() {
        let mut config = test_config("full", Mode::Separate, 1);
        config.bake.enabled = true;
        config.bake.resolution = RES;

        let quad_obj = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3 4/4
";
        let no_uv_obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let quad_path = config.output_dir.join("quad.obj");
        let no_uv_path = config.output_dir.join("bare.obj");
        std::fs::write(&quad_path, quad_obj).unwrap();
        std::fs::write(&no_uv_path, no_uv_obj).unwrap();

        config.meshes = vec![
            crate::config::MeshConfig {
                name: "quad".to_string(),
                path: quad_path,
                prompt: None,
            },
            crate::config::MeshConfig {
                name: "bare".to_string(),
                path: no_uv_path,
                prompt: None,
            },
        ];

        let service = MockGenerationService::new();
        service.push_image(solid(RES, [120, 130, 140]));

        let mut controller =
            Controller::new(&config, &service, CancelToken::new());
        controller.run().unwrap();
        assert_eq!(controller.state(), RunState::Done);

        // The UV-less mesh was skipped; the quad got its texture files.
        assert!(config.output_dir.join("quad_texture.png").exists());
        assert!(config.output_dir.join("quad_baked.png").exists());
        assert!(!config.output_dir.join("bare_texture.png").exists());
        service.take_requests();

        cleanup(&config);
    }

    #[test]
    fn test_failed_run_still_writes_textures() {
        let mut config = test_config("fail_tex", Mode::Sequential, 2);

        // The chart covers a quarter of the texture, leaving texels
        // for the fallback fill.
        let quad_obj = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 0.5 0
vt 0.5 0.5
vt 0 0.5
f 1/1 2/2 3/3 4/4
";
        let quad_path = config.output_dir.join("quad.obj");
        std::fs::write(&quad_path, quad_obj).unwrap();
        config.meshes = vec![crate::config::MeshConfig {
            name: "quad".to_string(),
            path: quad_path,
            prompt: None,
        }];

        let service = MockGenerationService::new();
        // Returns are popped in reverse: first view succeeds, second fails.
        service.push_failure("backend went away");
        service.push_image(solid(RES, [200, 0, 0]));

        let mut controller =
            Controller::new(&config, &service, CancelToken::new());
        let err = controller.run().unwrap_err();
        assert_eq!(err.kind, Backend);

        // The aborted run left a fallback-filled texture behind.
        let texture_path = config.output_dir.join("quad_texture.png");
        let texture = image::open(&texture_path).unwrap().into_rgb8();
        let fallback = (config.fallback_color[0] * 255.0).round() as u8;
        assert!(texture.pixels().any(|p| p[0] == fallback));

        // The state pair keeps only the committed view, for resume.
        let loaded =
            TextureState::load(&config.output_dir, "quad", RES).unwrap();
        assert!(loaded.painted_count() > 0);
        assert!(loaded.painted_count() < (RES * RES) as usize);
        service.take_requests();

        cleanup(&config);
    }
}
