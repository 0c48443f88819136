//! Keyward CLI - control daemon for an attestation spoofing module.

use clap::Parser;
use keyward::cli::{
    Cli, Commands, ConfigCommands, KeyboxCommands, LogFormat, ProfileCommands,
};
use keyward::commands::{self, Output};
use keyward::config::{ConfigOverrides, DaemonConfig, resolve_config};
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    let result = run_command(cli, human);

    if let Err(e) = result {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!(r#"{{"error": "{}"}}"#, e);
        }
        process::exit(1);
    }
}

fn run_command(cli: Cli, human: bool) -> Result<(), keyward::Error> {
    let port = match &cli.command {
        Some(Commands::Serve { port, .. }) => *port,
        _ => None,
    };
    let config = resolve_config(&ConfigOverrides {
        config_file: cli.config_file,
        config_dir: cli.config_dir,
        port,
    })?;
    let dir = config.config_dir();

    match cli.command {
        Some(Commands::Serve { log_format, .. }) => run_serve(&config, log_format)?,
        Some(Commands::Status) | None => output(&commands::status(dir)?, human),
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Get { key } => {
                output(&commands::config_get(dir, key.as_deref())?, human)
            }
            ConfigCommands::Set { key, value } => {
                output(&commands::config_set(dir, &key, &value)?, human)
            }
        },
        Some(Commands::Profile { command }) => match command {
            ProfileCommands::List => output(&commands::profile_list(), human),
            ProfileCommands::Apply { name, now } => {
                output(&commands::profile_apply(dir, &name, now)?, human)
            }
        },
        Some(Commands::Keybox { command }) => match command {
            KeyboxCommands::List => output(&commands::keybox_list(dir)?, human),
        },
    }

    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Install the log subscriber. `RUST_LOG` overrides the default `info` level.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Run the daemon until a shutdown signal arrives.
fn run_serve(config: &DaemonConfig, log_format: LogFormat) -> Result<(), keyward::Error> {
    init_tracing(log_format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("KEYWARD_GIT_COMMIT"),
        built = env!("KEYWARD_BUILD_TIMESTAMP"),
        config_dir = %config.config_dir().display(),
        config_dir_source = %config.config_dir.source,
        "starting keyward"
    );
    if !keyward::sys::is_root() {
        tracing::warn!("not running as root; the hook layer may not see changes");
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| keyward::Error::Other(format!("Failed to create runtime: {}", e)))?
        .block_on(keyward::server::start_server(config))
}
