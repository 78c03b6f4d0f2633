// file: src/main.rs
// version: 1.2.0
// guid: 4e29c8b7-a6f0-43d1-85e9-f17b3c50d2a8

//! Ubuntu Image Builder - Main entry point

use clap::Parser;
use ubuntu_image_builder::{
    cli::{
        args::{Cli, Commands},
        commands,
    },
    logging::logger,
    Result,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    logger::init_logger(cli.debug, cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Classic {
            image_definition,
            build,
        } => {
            let opts = commands::common_opts(cli.debug, cli.verbose, cli.quiet, &build);
            commands::classic_command(opts, &image_definition).await
        }
        Commands::Snap {
            model_assertion,
            build,
        } => {
            let opts = commands::common_opts(cli.debug, cli.verbose, cli.quiet, &build);
            commands::snap_command(opts, &model_assertion).await
        }
    }
}
