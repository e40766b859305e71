use anyhow::{Context, Result};
use shellport_core::HostRecord;
use shellport_db::Database;
use std::path::Path;

use crate::{HostCommands, config};

const PASSWORD_ENV: &str = "SHELLPORT_HOST_PASSWORD";

pub async fn handle(config_path: &Path, command: HostCommands) -> Result<()> {
    let config = config::load_config(config_path).await?;
    let db = Database::new(Path::new(&config.database_url)).await?;

    match command {
        HostCommands::List => list(&db).await?,
        HostCommands::Add {
            name,
            address,
            username,
            password,
            port,
            description,
            fingerprint,
        } => {
            let password = match password {
                Some(password) => password,
                None => std::env::var(PASSWORD_ENV)
                    .with_context(|| format!("No --password given and {PASSWORD_ENV} is not set"))?,
            };
            let mut host = HostRecord::new(0, name, address, port, username, password);
            host.description = description;
            host.host_key_fingerprint = fingerprint;
            add(&db, &host).await?;
        }
    }

    Ok(())
}

async fn list(db: &Database) -> Result<()> {
    let hosts = db.list_hosts().await?;

    if hosts.is_empty() {
        println!("No hosts registered.");
        return Ok(());
    }

    println!(
        "\n{:<6} {:<20} {:<24} {:<12} {:<10}",
        "ID", "Name", "Address", "User", "Host key"
    );
    println!("{}", "-".repeat(76));

    for host in hosts {
        println!(
            "{:<6} {:<20} {:<24} {:<12} {:<10}",
            host.id,
            host.name,
            format!("{}:{}", host.address, host.port),
            host.username,
            if host.host_key_fingerprint.is_some() {
                "pinned"
            } else {
                "-"
            }
        );
    }

    println!();
    Ok(())
}

async fn add(db: &Database, host: &HostRecord) -> Result<()> {
    if db.get_host_by_name(&host.name).await?.is_some() {
        anyhow::bail!("A host named {} already exists", host.name);
    }

    let id = db.create_host(host).await?;
    println!("Host registered successfully!");
    println!("  ID: {}", id);
    println!("  Name: {}", host.name);
    println!("  Address: {}:{}", host.address, host.port);
    if let Some(fingerprint) = &host.host_key_fingerprint {
        println!("  Pinned host key: {}", fingerprint);
    }
    Ok(())
}
