//! CLI argument definitions for Keyward.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Keyward - attestation spoofing control daemon.
///
/// Run `keyward serve` as root to start the daemon, then use the other
/// commands (or the admin UI) to inspect and change its configuration.
#[derive(Parser, Debug)]
#[command(name = "keyward")]
#[command(author, version, about = "Control daemon for an attestation spoofing module", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Config directory the daemon manages.
    /// Can also be set via KEYWARD_DIR environment variable.
    #[arg(short = 'd', long = "dir", global = true, env = "KEYWARD_DIR")]
    pub config_dir: Option<PathBuf>,

    /// TOML file with daemon settings
    #[arg(long = "config", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Log line format for the daemon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon: admin server, trigger observer and keybox maintainer
    Serve {
        /// Loopback port for the admin server (0 picks a free one)
        #[arg(short, long, env = "KEYWARD_PORT")]
        port: Option<u16>,

        /// Log line format
        #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
        log_format: LogFormat,
    },

    /// Show whether the daemon is running, and the current settings
    Status,

    /// Read or change settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Inspect and apply profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Keybox entry commands
    Keybox {
        #[command(subcommand)]
        command: KeyboxCommands,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Get one setting, or all of them
    Get {
        /// Setting name (e.g., global_mode, security_patch)
        key: Option<String>,
    },

    /// Set a setting
    Set {
        /// Setting name
        key: String,
        /// New value: true/false for flags, text otherwise
        value: String,
    },
}

/// Profile subcommands
#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// List the built-in profiles
    List,

    /// Apply a profile
    ///
    /// By default this queues the profile for the running daemon.
    Apply {
        /// Profile name (minimal, default, dailyuse, godprofile, maximal)
        name: String,

        /// Write the settings directly instead of queueing for the daemon
        #[arg(long)]
        now: bool,
    },
}

/// Keybox subcommands
#[derive(Subcommand, Debug)]
pub enum KeyboxCommands {
    /// List keybox entries with their status
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_profile_apply_now() {
        let cli = Cli::try_parse_from(["keyward", "-d", "/tmp/kw", "profile", "apply", "maximal", "--now"])
            .unwrap();
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/kw")));
        match cli.command {
            Some(Commands::Profile {
                command: ProfileCommands::Apply { name, now },
            }) => {
                assert_eq!(name, "maximal");
                assert!(now);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_serve_json_logs() {
        let cli = Cli::try_parse_from(["keyward", "serve", "--port", "8080", "--log-format", "json"]).unwrap();
        match cli.command {
            Some(Commands::Serve { port, log_format }) => {
                assert_eq!(port, Some(8080));
                assert_eq!(log_format, LogFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_config_get_key_is_optional() {
        let cli = Cli::try_parse_from(["keyward", "-H", "config", "get"]).unwrap();
        assert!(cli.human_readable);
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                command: ConfigCommands::Get { key: None }
            })
        ));
    }
}
