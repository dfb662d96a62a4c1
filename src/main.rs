//! Deploy Button - bridges a serial push-button to TeamCity
//!
//! This is the binary entry point. All logic lives in the workspace crates.

mod headless;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

use dbtn_app::config::{default_config_path, init_config};
use dbtn_link::{PortProvider, SerialPortProvider};

/// Deploy Button - press the button, ship the build
#[derive(Parser, Debug)]
#[command(name = "dbtn")]
#[command(about = "Bridges a serial deploy button to a TeamCity build", long_about = None)]
struct Args {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Print UI events to stdout as NDJSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a commented default config file
    Init,
    /// List serial ports visible to the system
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(default_config_path);

    match args.command {
        Some(Commands::Init) => {
            if init_config(&config_path)? {
                println!("Wrote default config to {}", config_path.display());
            } else {
                println!("Config already exists at {}", config_path.display());
            }
            Ok(())
        }
        Some(Commands::Ports) => {
            let ports = SerialPortProvider::new().available_ports();
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
            Ok(())
        }
        None => {
            dbtn_core::logging::init()?;
            headless::runner::run_service(config_path, args.json).await?;
            Ok(())
        }
    }
}
