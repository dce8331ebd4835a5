use log::LevelFilter;
use simplelog::{ColorChoice, Config, SimpleLogger, TermLogger, TerminalMode};
use structopt::StructOpt;

use texgen::{bake, generate, project};

#[derive(StructOpt)]
#[structopt(about = "Multi-view texture synthesis and blending engine")]
struct Opts {
    #[structopt(help = "Enable debug logging", long, short = "v")]
    verbose: bool,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    Bake(bake::BakeParams),
    Generate(generate::GenerateParams),
    Project(project::ProjectParams),
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .is_err()
    {
        let _ = SimpleLogger::init(level, Config::default());
    }
}

fn main() {
    let opts: Opts = Opts::from_args();
    init_logging(opts.verbose);

    let res = match opts.command {
        Command::Bake(params) => bake::bake(&params),
        Command::Generate(params) => generate::generate(&params),
        Command::Project(params) => project::project(&params),
    };

    if let Err(err) = res {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
