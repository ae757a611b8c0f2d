//! KeyBridge - Key event injection over the ADB wire protocol
//!
//! Command-line front end for the client library.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keybridge::config::{self, Config};
use keybridge::protocol::{self, Command};
use keybridge::{Client, KeyCode};

/// KeyBridge - send key events to a device over network ADB
#[derive(Parser)]
#[command(name = "keybridge")]
#[command(author = "KeyBridge Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Inject key events into an Android device over network ADB", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Device host (overrides the configuration file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Device port (overrides the configuration file)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Perform the handshake and report the device banner
    Connect,

    /// Send one or more key events
    Key {
        /// Key codes or names (e.g. 19, DPAD_UP, KEYCODE_ENTER)
        #[arg(required = true)]
        keys: Vec<KeyCode>,

        /// Pause between two keys (milliseconds)
        #[arg(short, long, default_value_t = 0)]
        interval_ms: u64,
    },

    /// Run a shell command on the device
    Shell {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if let Some(host) = cli.host {
        config.target.host = host;
    }
    if let Some(port) = cli.port {
        config.target.port = port;
    }

    match cli.command {
        Commands::Connect => {
            run_connect(&config).await?;
        }
        Commands::Key { keys, interval_ms } => {
            run_keys(&config, &keys, Duration::from_millis(interval_ms)).await?;
        }
        Commands::Shell { command } => {
            run_shell(&config, &command.join(" ")).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info();
        }
    }

    Ok(())
}

/// Connect to the configured device or fail with a readable error
async fn connect(config: &Config) -> anyhow::Result<Client> {
    let client = Client::new(config.client_config());

    if !client.connect(&config.target.host, config.target.port).await {
        anyhow::bail!(
            "Could not connect to {}:{}",
            config.target.host,
            config.target.port
        );
    }

    Ok(client)
}

/// Handshake only
async fn run_connect(config: &Config) -> anyhow::Result<()> {
    let client = connect(config).await?;

    if let Some(peer) = client.peer_info().await {
        println!("Device:   {}:{}", config.target.host, config.target.port);
        println!("Banner:   {}", peer.banner);
        println!("Version:  {:#010x}", peer.version);
        println!("Max data: {}", peer.max_payload);
    }

    client.disconnect().await;
    Ok(())
}

/// Send each key in order
async fn run_keys(config: &Config, keys: &[KeyCode], interval: Duration) -> anyhow::Result<()> {
    let client = connect(config).await?;
    let mut failed = 0usize;

    for (i, key) in keys.iter().enumerate() {
        if i > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        if !client.send_key_event(*key).await {
            failed += 1;
        }
    }

    client.disconnect().await;

    if failed > 0 {
        anyhow::bail!("{} of {} key events failed", failed, keys.len());
    }
    Ok(())
}

/// Run one shell command
async fn run_shell(config: &Config, command: &str) -> anyhow::Result<()> {
    let client = connect(config).await?;
    let ran = client.run_shell_command(command).await;
    client.disconnect().await;

    if !ran {
        anyhow::bail!("Command '{}' failed", command);
    }
    Ok(())
}

/// Print protocol constants and known key names
fn print_protocol_info() {
    println!("KeyBridge Protocol Information");
    println!("==============================\n");

    println!("Protocol Version: {:#010x}", protocol::PROTOCOL_VERSION);
    println!("Max Payload:      {}", protocol::MAX_PAYLOAD);
    println!("Default Port:     {}", protocol::DEFAULT_PORT);
    println!("Header Size:      {} bytes", protocol::HEADER_SIZE);

    println!("\nCommands:");
    for command in [
        Command::Connect,
        Command::Okay,
        Command::Write,
        Command::Close,
        Command::Open,
    ] {
        println!("  {}  {:#010x}", command, command.code());
    }

    println!("\nKey names:");
    for (name, key) in KeyCode::named() {
        println!("  {:<18} {}", name, key.code());
    }
}
