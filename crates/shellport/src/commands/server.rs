use anyhow::{Context, Result};
use shellport_core::{HostKeyCheck, LogFormat, ServerConfig};
use shellport_db::Database;
use shellport_http::HttpServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{config, logging};

/// Command-line overrides of the `[logging]` section
pub struct LogOverrides {
    pub verbose: bool,
    pub format: Option<LogFormat>,
    pub file: Option<PathBuf>,
}

pub async fn init_config(config_path: &Path) -> Result<()> {
    let default_config = ServerConfig::default();
    config::save_config(config_path, &default_config).await?;
    println!("Configuration file created at: {}", config_path.display());
    println!("\nPlease review and edit the configuration before starting the server.");
    Ok(())
}

/// Start the Shellport gateway
///
/// NIST Controls:
/// - CM-6: Configuration Settings (load from config file)
/// - AU-3: Content of Audit Records (log startup events)
/// - SC-7: Boundary Protection (network service initialization)
pub async fn run(config_path: &Path, overrides: LogOverrides) -> Result<()> {
    let mut config = config::load_config(config_path)
        .await
        .context("Failed to load configuration")?;

    if let Some(format) = overrides.format {
        config.logging.format = format;
    }
    if let Some(file) = overrides.file {
        config.logging.file = Some(file);
    }
    if overrides.verbose {
        config.logging.level = "debug".to_string();
    }
    let _log_guard = logging::init(&config.logging);

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting Shellport gateway"
    );
    info!(
        event = "server_configuration",
        bind_address = %config.bind_address,
        http_port = config.http_port,
        tls = config.tls.as_ref().is_some_and(|tls| tls.enabled),
        host_key_policy = ?config.ssh.host_key_policy,
        connect_timeout_secs = config.ssh.connect_timeout_secs,
        output_frame = ?config.terminal.output_frame,
        allowed_origins = ?config.terminal.allowed_origins,
        "Gateway configuration"
    );
    if config.ssh.host_key_policy == HostKeyCheck::AcceptAny {
        warn!(
            event = "host_key_checking_disabled",
            "Host keys of hosts without a pinned fingerprint are not verified"
        );
    }

    // NIST SC-28: Protection of Information at Rest (host credentials)
    let db = Arc::new(
        Database::new(Path::new(&config.database_url))
            .await
            .context("Failed to initialize database")?,
    );
    info!("Host registry opened: {}", config.database_url);

    let http_server = HttpServer::new(db, config);
    let mut http_handle = tokio::spawn(async move { http_server.run().await });

    info!("Shellport is running. Press Ctrl+C to stop.");

    tokio::select! {
        joined = &mut http_handle => {
            match joined {
                Ok(Ok(())) => info!("HTTP server stopped"),
                Ok(Err(e)) => {
                    error!(event = "server_failed", error = %e, "HTTP server error");
                    return Err(e.into());
                }
                Err(e) => {
                    error!(event = "server_failed", error = %e, "HTTP server task failed");
                    return Err(e.into());
                }
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(event = "server_stopping", "Shutting down...");
            http_handle.abort();
        }
    }

    Ok(())
}
