use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use log_sage::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = cli::Cli::parse();

    init_tracing(&args.log_format);

    let config_path = args.config.as_deref();

    // Dispatch to appropriate command handler
    match args.get_command() {
        cli::Commands::Serve => {
            commands::serve::execute(config_path).await?;
        }
        cli::Commands::Analyze(analyze_args) => {
            commands::analyze::execute(config_path, analyze_args).await?;
        }
        cli::Commands::Test => {
            commands::test::execute(config_path)?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(config_path)?,
            cli::ConfigCommands::Validate => commands::config::validate(config_path)?,
        },
        cli::Commands::Version => {
            println!("log-sage v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
