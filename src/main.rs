use anyhow::Result;
use clap::Parser;
use std::path::Path;

use repobind::cli::{self, Cli, Commands};
use repobind::config::{Config, LoggingConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let verbose = cli.verbose;
    let explicit = cli.config.as_deref();

    match cli.command {
        Commands::Apply(args) => cli::apply::run(args, load_config(explicit, verbose)?).await,
        Commands::List(args) => cli::list::run(args, &load_config(explicit, verbose)?),
        Commands::Teardown(args) => cli::teardown::run(args, &load_config(explicit, verbose)?),
        // Must work even when the config file does not parse.
        Commands::Config(args) => {
            init_logging(verbose, &LoggingConfig::default());
            cli::config::run(args, explicit)
        }
        Commands::Paths(args) => {
            init_logging(verbose, &LoggingConfig::default());
            cli::paths::run(args)
        }
    }
}

fn load_config(explicit: Option<&Path>, verbose: bool) -> Result<Config> {
    let config = Config::load(explicit)?;
    init_logging(verbose, &config.logging);
    Ok(config)
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let log_level: &str = if verbose { "debug" } else { &logging.level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
