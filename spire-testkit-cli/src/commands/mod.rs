//! Command handlers -- one module per subcommand

pub mod config;
pub mod render;
pub mod run;

use std::path::Path;

use tracing::debug;

use spire_testkit_core::config::TestkitConfig;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::output::OutputWriter;

/// Dispatch the parsed command line to its handler.
pub async fn dispatch(cli: Cli, writer: &OutputWriter) -> Result<(), CliError> {
    match cli.command {
        Commands::Config(args) => config::execute(args, &cli.config, writer).await,
        Commands::Render(args) => {
            let config = load_effective(&cli.config).await?;
            render::execute(args, &config, writer).await
        }
        Commands::Run(args) => {
            let config = load_effective(&cli.config).await?;
            run::execute(args, &config, writer).await
        }
    }
}

/// Load the configuration used by `render` and `run`.
///
/// A missing file is not an error here: defaults plus environment
/// overrides are used instead. A file that exists must parse and validate.
pub async fn load_effective(path: &Path) -> Result<TestkitConfig, CliError> {
    if tokio::fs::try_exists(path).await? {
        return Ok(TestkitConfig::load(path).await?);
    }
    debug!(path = %path.display(), "config file not found, using defaults");
    let mut config = TestkitConfig::default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
