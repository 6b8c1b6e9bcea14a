//! planmap command-line entry point.

mod script;

use clap::{Parser, Subcommand};
use script::ReplayOptions;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "planmap", version, about = "Planning-area drawing engine tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON action script against in-memory viewports
    Replay {
        /// Script file (a JSON array of actions)
        script: PathBuf,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory holding `<name>.geojson` overlay layers
        #[arg(long, default_value = "layers")]
        layers: PathBuf,

        /// Number of viewports; the first is primary
        #[arg(long, default_value_t = 2)]
        viewports: usize,

        /// Colormaps file (a JSON array of colormaps) for legend actions
        #[arg(long)]
        colormaps: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            script,
            config,
            layers,
            viewports,
            colormaps,
        } => {
            let options = ReplayOptions {
                script,
                config,
                layers,
                viewports,
                colormaps,
            };
            log::info!("replaying {}", options.script.display());
            let stdout = std::io::stdout();
            match script::replay(&options, &mut stdout.lock()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("planmap: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
