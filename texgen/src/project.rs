use std::path::PathBuf;

use log::{info, warn};
use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, Result};
use base::util::fs;

use crate::compositor::composite_view;
use crate::config::RunConfig;
use crate::mesh::import_obj;
use crate::projection::{rasterize_texel_surfaces, sample_view};
use crate::state::TextureState;

#[derive(StructOpt)]
#[structopt(about = "Re-project stored view images onto textures")]
pub struct ProjectParams {
    #[structopt(help = "Run configuration .json file")]
    config_path: PathBuf,
    #[structopt(
        help = "Directory with the stored view images \
                (the configured output directory if omitted)",
        long
    )]
    images_dir: Option<PathBuf>,
}

/// Repeats the projection and blending of a finished run from its stored
/// per-view images, without any backend calls. Useful after editing the
/// view images or changing the weighting parameters.
pub fn project(params: &ProjectParams) -> Result<()> {
    let config = RunConfig::load(&params.config_path)?;
    let images_dir = params
        .images_dir
        .clone()
        .unwrap_or_else(|| config.output_dir.clone());

    let mut meshes = vec![];
    for mesh_config in &config.meshes {
        let mesh = import_obj(&mesh_config.name, &mesh_config.path)?;
        if mesh.has_degenerate_uvs() {
            warn!("skipping mesh '{}' with a degenerate UV chart", mesh.name);
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

    let resolution = config.texture_resolution;
    let surfaces: Vec<_> = meshes
        .iter()
        .map(|mesh| rasterize_texel_surfaces(mesh, resolution))
        .collect();
    let mut states: Vec<_> = meshes
        .iter()
        .map(|_| TextureState::new(resolution))
        .collect();

    for (view_idx, view) in config.views.iter().enumerate() {
        let path =
            images_dir.join(format!("view_{}_generated.png", view_idx));
        let data = fs::read_file(&path)?;
        let image = image::load_from_memory(&data)
            .map_err(|e| {
                Error::with_source(
                    MalformedData,
                    format!("failed to decode view image '{}'", path.display()),
                    e,
                )
            })?
            .into_rgb8();

        info!("projecting view {}...", view_idx);
        let sample = sample_view(
            &meshes,
            &surfaces,
            view,
            config.canvas_resolution,
            config.canvas_resolution,
            resolution,
            &config.weighting,
            config.sampler.canny_low,
            config.sampler.canny_high,
        );
        for (state, field) in states.iter_mut().zip(&sample.weights) {
            composite_view(state, &image, field);
        }
    }

    let [r, g, b] = config.fallback_color;
    let fallback = crate::misc::Vector3::new(r, g, b) * 255.0;
    for (mesh, state) in meshes.iter().zip(states.iter_mut()) {
        state.fill_fallback(fallback);
        state.save(&config.output_dir, &mesh.name)?;

        let path = config
            .output_dir
            .join(format!("{}_texture.png", mesh.name));
        state.color_image().save(&path).map_err(|e| {
            Error::with_source(
                IoError,
                format!("failed to write '{}'", path.display()),
                e,
            )
        })?;
    }

    Ok(())
}
