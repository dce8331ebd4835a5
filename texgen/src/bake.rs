use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, Result};
use base::util::cli;

use crate::baker;
use crate::misc::Vector3;
use crate::state::TextureState;

#[derive(StructOpt)]
#[structopt(about = "Bake a persisted texture state into a final texture")]
pub struct BakeParams {
    #[structopt(help = "Directory holding the persisted texture state")]
    state_dir: PathBuf,
    #[structopt(help = "Mesh name the state was saved under")]
    mesh: String,
    #[structopt(
        help = "Resolution of the persisted state",
        long,
        default_value = "1024"
    )]
    state_resolution: u32,
    #[structopt(
        help = "Output texture resolution",
        long,
        default_value = "2048"
    )]
    resolution: u32,
    #[structopt(help = "Gutter size in pixels", long, default_value = "4")]
    gutter: u32,
    #[structopt(
        help = "Fallback color as 'r,g,b' in [0, 1]",
        long,
        default_value = "0.5,0.5,0.5"
    )]
    fallback: cli::Array<f64, 3>,
    #[structopt(
        help = "Output .png file ('<mesh>_baked.png' if omitted)",
        long,
        short = "o"
    )]
    out_path: Option<PathBuf>,
}

pub fn bake(params: &BakeParams) -> Result<()> {
    let state = TextureState::load(
        &params.state_dir,
        &params.mesh,
        params.state_resolution,
    )?;

    info!(
        "baking '{}' at {}x{}...",
        params.mesh, params.resolution, params.resolution
    );
    let cli::Array([r, g, b]) = params.fallback;
    let fallback = Vector3::new(r, g, b) * 255.0;
    let image =
        baker::bake(&state, params.resolution, params.gutter, fallback);

    let out_path = params.out_path.clone().unwrap_or_else(|| {
        params.state_dir.join(format!("{}_baked.png", params.mesh))
    });
    image.save(&out_path).map_err(|e| {
        Error::with_source(
            IoError,
            format!("failed to write '{}'", out_path.display()),
            e,
        )
    })
}
