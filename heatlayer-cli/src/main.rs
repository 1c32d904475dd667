//! heatlayer CLI - stage services and offline raster tooling.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use heatlayer::service::Role;

use commands::compute::ComputeCommands;
use commands::config::ConfigCommands;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "heatlayer")]
#[command(version = heatlayer::VERSION)]
#[command(about = "Orthophotos to vegetation indices, heat-risk maps and published layers", long_about = None)]
struct Cli {
    /// Configuration file (default: $HEATLAYER_CONFIG or ~/.heatlayer/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline stage as an HTTP service
    Serve {
        /// ingestion, index, prediction or publication
        role: Role,
    },

    /// Run one pipeline stage once and exit
    Run {
        /// ingestion, index, prediction or publication
        role: Role,
    },

    /// Compute a layer from local files
    #[command(subcommand)]
    Compute(ComputeCommands),

    /// Render a PNG quicklook of an encoded layer
    Preview {
        /// Encoded GeoTIFF (NDVI, NDWI or heat risk)
        layer: PathBuf,

        /// Output PNG
        #[arg(long)]
        out: PathBuf,
    },

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli) {
        e.exit();
    }
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Config(command) => commands::config::run(command, config_path),
        Commands::Serve { role } => commands::serve::run_serve(CliRunner::new(config_path, true)?, role),
        Commands::Run { role } => {
            commands::serve::run_once_command(CliRunner::new(config_path, false)?, role)
        }
        Commands::Compute(command) => {
            let runner = CliRunner::new(config_path, false)?;
            runner.log_startup("compute");
            commands::compute::run(command, runner.config())
        }
        Commands::Preview { layer, out } => {
            let runner = CliRunner::new(config_path, false)?;
            runner.log_startup("preview");
            commands::preview::run(&layer, &out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_serve_role() {
        let cli = Cli::try_parse_from(["heatlayer", "serve", "publication"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { role: Role::Publication }));
        assert!(Cli::try_parse_from(["heatlayer", "serve", "tiler"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["heatlayer", "config", "path", "--config", "/etc/heatlayer.ini"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/heatlayer.ini")));
    }
}
