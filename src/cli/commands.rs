use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use super::demo::build_demo_app;
use crate::config::FrameworkConfig;
use crate::server::ListenOptions;

/// Command-line interface for brrtframe
#[derive(Parser)]
#[command(name = "brrtframe")]
#[command(about = "brrtframe demo server", long_about = None)]
pub struct Cli {
    /// Framework configuration file (YAML or TOML)
    #[arg(short, long, env = "BRRTF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve the demo application until Ctrl-C
    Serve {
        /// Interface to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind; 0 picks a free one
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
    /// Print the demo application's route table
    Routes,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FrameworkConfig> {
    Ok(match path {
        Some(path) => FrameworkConfig::load(path)?.with_env_overrides(),
        None => FrameworkConfig::from_env(),
    })
}

/// Execute the parsed command.
///
/// # Errors
///
/// Configuration, registration and listen failures.
pub async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let app = build_demo_app(config)?;

    match &cli.command {
        Commands::Routes => {
            app.ready().await?;
            print!("{}", app.print_routes()?);
            Ok(())
        }
        Commands::Serve { host, port } => {
            let options = ListenOptions::new().host(host.clone()).port(*port);
            let addr = app.listen(options).await?;
            println!("brrtframe listening on http://{addr}");

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            app.close().await?;
            Ok(())
        }
    }
}
