mod cli;
mod commands;
mod config;
mod storage;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        command => run_store_command(command, &config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to warn so values stay on stdout alone.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("tierstore {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn run_store_command(command: Command, config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    match command {
        Command::Health => {
            commands::health(&store)?;
            println!("Storage: ok");
        }
        Command::Get(key) => match commands::get(&store, &key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => color_eyre::eyre::bail!("no value stored for {}", key.name),
        },
        Command::Set {
            key,
            value,
            accessible,
        } => commands::set(&store, &key, &value, accessible),
        Command::Unset(key) => commands::unset(&store, &key),
        Command::Clear { kinds } => commands::clear(&store, &kinds),
        Command::Destroy { yes } => {
            if !yes {
                color_eyre::eyre::bail!("refusing to erase every tier without --yes");
            }
            commands::destroy(&store);
            println!("Store destroyed");
        }
        Command::Sync => {
            commands::sync(&store);
            println!("Sync complete");
        }
        Command::Version | Command::Config(_) => {}
    }
    Ok(())
}
