mod commands;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use shellport_core::LogFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shellport")]
#[command(about = "Browser gateway to SSH terminals and SFTP file management", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/shellport/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket gateway
    Server {
        /// Generate default configuration file
        #[arg(long)]
        init_config: bool,

        /// Verbose logging (debug level)
        #[arg(short, long)]
        verbose: bool,

        /// Log format (json or text)
        #[arg(long)]
        log_format: Option<LogFormat>,

        /// Log file path
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Manage registered hosts
    #[command(subcommand)]
    Host(HostCommands),
}

#[derive(Subcommand)]
enum HostCommands {
    /// List all registered hosts
    List,

    /// Register a host
    Add {
        /// Unique host name
        name: String,

        /// Address or hostname to dial
        address: String,

        /// Login user
        #[arg(short, long)]
        username: String,

        /// Login password; read from `SHELLPORT_HOST_PASSWORD` when omitted
        #[arg(short, long)]
        password: Option<String>,

        /// SSH port
        #[arg(long, default_value = "22")]
        port: u16,

        /// Host description
        #[arg(short, long)]
        description: Option<String>,

        /// Pin the server host key (`SHA256:...`)
        #[arg(long)]
        fingerprint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            init_config,
            verbose,
            log_format,
            log_file,
        } => {
            if init_config {
                commands::server::init_config(&cli.config).await?;
            } else {
                let overrides = commands::server::LogOverrides {
                    verbose,
                    format: log_format,
                    file: log_file,
                };
                commands::server::run(&cli.config, overrides).await?;
            }
        }
        Commands::Host(cmd) => {
            let _log_guard = logging::init(&shellport_core::LoggingConfig {
                level: "warn".to_string(),
                ..Default::default()
            });
            commands::host::handle(&cli.config, cmd).await?;
        }
    }

    Ok(())
}
