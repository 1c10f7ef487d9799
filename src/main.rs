use anyhow::Result;
use clap::{CommandFactory, Parser};
use eva_voice::audio::capture::{DeviceKind, list_devices};
use eva_voice::cli::{Cli, Commands};
use eva_voice::config::Config;
use eva_voice::daemon::run_daemon;
use eva_voice::ipc::client::send_command;
use eva_voice::ipc::protocol::{Command, Response};
use eva_voice::ipc::server::IpcServer;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            run_daemon(config, None, !cli.quiet).await?;
        }
        Some(Commands::Run { socket }) => {
            let config = load_config(cli.config.as_deref())?;
            run_daemon(config, socket, !cli.quiet).await?;
        }
        Some(Commands::Daemon { socket }) => {
            let config = load_config(cli.config.as_deref())?;
            run_daemon(config, socket, false).await?;
        }
        Some(Commands::Toggle { socket }) => {
            handle_ipc_command(socket, Command::Toggle).await?;
        }
        Some(Commands::Start { socket }) => {
            handle_ipc_command(socket, Command::Start).await?;
        }
        Some(Commands::Stop { socket }) => {
            handle_ipc_command(socket, Command::Stop).await?;
        }
        Some(Commands::Status { socket }) => {
            handle_ipc_command(socket, Command::Status).await?;
        }
        Some(Commands::Shutdown { socket }) => {
            handle_ipc_command(socket, Command::Shutdown).await?;
        }
        Some(Commands::Devices { output }) => {
            let kind = if output {
                DeviceKind::Output
            } else {
                DeviceKind::Input
            };
            list_audio_devices(kind)?;
        }
        Some(Commands::Config) => {
            let mut config = load_config(cli.config.as_deref())?;
            if config.live.api_key.is_some() {
                config.live.api_key = Some("<redacted>".to_string());
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "eva-voice",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the -q/-v flags.
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load configuration from file with environment variable overrides
///
/// Priority order:
/// 1. Custom config path (if provided via --config)
/// 2. Default config path (~/.config/eva-voice/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn list_audio_devices(kind: DeviceKind) -> Result<()> {
    let devices = list_devices(kind)?;

    if devices.is_empty() {
        eprintln!("No audio {:?} devices found", kind);
        std::process::exit(1);
    }

    println!("Available audio {:?} devices:", kind);
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Send IPC command to the assistant and render its response.
async fn handle_ipc_command(socket: Option<std::path::PathBuf>, command: Command) -> Result<()> {
    let socket_path = socket.unwrap_or_else(IpcServer::default_socket_path);

    match send_command(&socket_path, command).await {
        Ok(response) => match response {
            Response::Ok => {
                println!("{}", "OK".green());
            }
            Response::State { state } => {
                if state.disabled() {
                    println!("{}", state.label().yellow());
                } else {
                    println!("{}", state.label().green());
                }
            }
            Response::Status {
                state,
                disabled,
                captions,
            } => {
                println!("Status:");
                println!("  {}    {}", "Client:".dimmed(), eva_voice::version_string());
                println!("  {}     {}", "State:".dimmed(), state);
                println!(
                    "  {}    {}",
                    "Button:".dimmed(),
                    if disabled { "disabled" } else { "enabled" }
                );
                println!(
                    "  {}  {}",
                    "Captions:".dimmed(),
                    if captions { "available" } else { "unavailable" }
                );
            }
            Response::Error { message } => {
                eprintln!("{}", format!("Error: {}", message).red());
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!(
                "{}",
                format!("Failed to communicate with the assistant: {}", e).red()
            );
            eprintln!("Is it running? Start it with: eva-voice daemon");
            std::process::exit(1);
        }
    }

    Ok(())
}
