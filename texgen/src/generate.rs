use std::path::PathBuf;

use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, Result};
use base::util::cli::parse_key_val;
use base::util::sync::CancelToken;

use crate::backend::HttpGenerationService;
use crate::config::RunConfig;
use crate::controller::Controller;

#[derive(StructOpt)]
#[structopt(about = "Generate textures for a run configuration")]
pub struct GenerateParams {
    #[structopt(help = "Run configuration .json file")]
    config_path: PathBuf,
    #[structopt(
        help = "Override the first view index to process",
        long
    )]
    resume_from: Option<usize>,
    #[structopt(help = "Override the output directory", long, short = "o")]
    output_dir: Option<PathBuf>,
    #[structopt(
        help = "Override an object prompt as 'mesh=prompt'",
        long = "object-prompt",
        number_of_values = 1,
        parse(try_from_str = parse_key_val)
    )]
    object_prompts: Vec<(String, String)>,
}

pub fn generate(params: &GenerateParams) -> Result<()> {
    let mut config = RunConfig::load(&params.config_path)?;
    if let Some(resume_from) = params.resume_from {
        config.resume_from = resume_from;
    }
    if let Some(output_dir) = &params.output_dir {
        config.output_dir = output_dir.clone();
    }
    for (name, prompt) in &params.object_prompts {
        let mesh = config
            .meshes
            .iter_mut()
            .find(|mesh| &mesh.name == name)
            .ok_or_else(|| {
                Error::new(
                    Configuration,
                    format!("no mesh '{}' to override the prompt of", name),
                )
            })?;
        mesh.prompt = Some(prompt.clone());
    }
    config.validate()?;

    let service = HttpGenerationService::new(&config.backend);
    let mut controller =
        Controller::new(&config, &service, CancelToken::new());
    controller.run()
}
