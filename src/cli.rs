//! Command-line interface for eva-voice
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Voice assistant client for the EVA care service
#[derive(Parser, Debug)]
#[command(
    name = "eva-voice",
    version,
    about = "Real-time voice assistant client for the EVA care service"
)]
pub struct Cli {
    /// Subcommand to execute (default: run in the foreground)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Default tracing filter directive for the chosen verbosity.
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            return "eva_voice=warn";
        }
        match self.verbose {
            0 => "eva_voice=info",
            1 => "eva_voice=debug",
            _ => "eva_voice=trace",
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the assistant in the foreground, printing state changes
    Run {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/eva-voice.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Start the assistant as a background service (for systemd)
    Daemon {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/eva-voice.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Toggle the conversation on/off via IPC
    Toggle {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/eva-voice.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Start a conversation via IPC
    Start {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/eva-voice.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// End the current conversation via IPC
    Stop {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/eva-voice.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Show the assistant's toggle state via IPC
    Status {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/eva-voice.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Stop a running assistant process via IPC
    Shutdown {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/eva-voice.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// List audio devices
    Devices {
        /// List output (speaker) devices instead of inputs
        #[arg(long)]
        output: bool,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["eva-voice"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
        assert_eq!(cli.log_directive(), "eva_voice=info");
    }

    #[test]
    fn test_verbosity_maps_to_log_directive() {
        let cli = Cli::try_parse_from(["eva-voice", "-v"]).unwrap();
        assert_eq!(cli.log_directive(), "eva_voice=debug");
        let cli = Cli::try_parse_from(["eva-voice", "-v", "-v"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_directive(), "eva_voice=trace");
        let cli = Cli::try_parse_from(["eva-voice", "-q", "-vv"]).unwrap();
        assert_eq!(cli.log_directive(), "eva_voice=warn");
    }

    #[test]
    fn test_parse_toggle_with_socket() {
        let cli = Cli::try_parse_from(["eva-voice", "toggle", "--socket", "/tmp/eva.sock"]).unwrap();
        match cli.command {
            Some(Commands::Toggle { socket }) => {
                assert_eq!(socket, Some(PathBuf::from("/tmp/eva.sock")));
            }
            other => panic!("Expected Toggle, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_daemon_without_socket() {
        let cli = Cli::try_parse_from(["eva-voice", "daemon"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Daemon { socket: None })));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["eva-voice", "status", "--config", "/etc/eva.toml", "-v"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Status { .. })));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/eva.toml")));
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_parse_devices_output_flag() {
        let cli = Cli::try_parse_from(["eva-voice", "devices", "--output"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Devices { output: true })));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["eva-voice", "record"]).is_err());
    }
}
