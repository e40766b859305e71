//! HTTP and WebSocket front end of the Shellport gateway.
//!
//! Routes live under `/api/host/{id}`: SFTP file operations answer with JSON
//! or attachments, and `/webshell` upgrades to a WebSocket carrying an
//! interactive terminal.

mod api;
mod error;
mod origin;
mod settings;
mod terminal;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use rustls::ServerConfig as RustlsServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use shellport_core::{HostRegistry, Result, ServerConfig, ShellportError};
use shellport_ssh::StagingConfig;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;
pub use origin::OriginPolicy;
pub use settings::{connect_options, credential_for, host_key_policy, staging_config, terminal_options};
pub use terminal::{Utf8Carry, WsSink, WsSource};

pub struct HttpServer {
    registry: Arc<dyn HostRegistry>,
    config: ServerConfig,
}

impl HttpServer {
    pub fn new(registry: Arc<dyn HostRegistry>, config: ServerConfig) -> Self {
        Self { registry, config }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.router();

        // Check if TLS is configured and enabled
        if let Some(tls_config) = &self.config.tls {
            if tls_config.enabled {
                return self.run_https(app, tls_config).await;
            }
        }

        self.run_http(app).await
    }

    async fn run_http(&self, app: Router) -> Result<()> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.http_port);
        info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ShellportError::Http(e.to_string()))?;

        Ok(())
    }

    async fn run_https(&self, app: Router, tls_config: &shellport_core::TlsConfig) -> Result<()> {
        let rustls_config = self.load_tls_config(tls_config)?;

        let https_port = self.config.https_port.unwrap_or(8443);
        let addr = SocketAddr::new(self.config.bind_address, https_port);
        info!("HTTPS server listening on https://{}", addr);
        info!("  Certificate: {}", tls_config.cert_path.display());
        info!("  Private key: {}", tls_config.key_path.display());

        let tls_rustls_config =
            axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(rustls_config));

        axum_server::bind_rustls(addr, tls_rustls_config)
            .serve(app.into_make_service())
            .await
            .map_err(|e| ShellportError::Http(e.to_string()))?;

        Ok(())
    }

    fn load_tls_config(&self, tls_config: &shellport_core::TlsConfig) -> Result<RustlsServerConfig> {
        let cert_file = File::open(&tls_config.cert_path)
            .map_err(|e| ShellportError::Http(format!("Failed to open certificate file: {}", e)))?;
        let mut cert_reader = BufReader::new(cert_file);
        let cert_chain: Vec<_> = certs(&mut cert_reader)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ShellportError::Http(format!("Failed to parse certificate: {}", e)))?;

        if cert_chain.is_empty() {
            return Err(ShellportError::Http(
                "No certificates found in certificate file".to_string(),
            ));
        }

        let key_file = File::open(&tls_config.key_path)
            .map_err(|e| ShellportError::Http(format!("Failed to open private key file: {}", e)))?;
        let mut key_reader = BufReader::new(key_file);
        let mut keys = pkcs8_private_keys(&mut key_reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ShellportError::Http(format!("Failed to parse private key: {}", e)))?;

        if keys.is_empty() {
            return Err(ShellportError::Http("No private keys found in key file".to_string()));
        }

        let private_key = keys.remove(0);

        let config = RustlsServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key.into())
            .map_err(|e| ShellportError::Http(format!("Failed to build TLS config: {}", e)))?;

        Ok(config)
    }

    /// Build the application router
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            config: Arc::new(self.config.clone()),
            origins: Arc::new(OriginPolicy::from_allowed(
                &self.config.terminal.allowed_origins,
            )),
            staging: staging_config(&self.config.transfer),
        };
        let upload_limit = DefaultBodyLimit::max(self.config.transfer.max_upload_bytes);

        Router::new()
            // SFTP file operations
            .route(
                "/api/host/{id}/sftp",
                get(api::list_files).delete(api::delete_file),
            )
            .route(
                "/api/host/{id}/sftp/upload",
                post(api::upload_file).layer(upload_limit),
            )
            .route("/api/host/{id}/sftp/download", get(api::download_file))
            .route("/api/host/{id}/sftp/download-dir", get(api::download_directory))
            .route("/api/host/{id}/sftp/rename", put(api::rename_file))
            .route("/api/host/{id}/sftp/compress", post(api::compress_directory))

            // Interactive terminal
            .route("/api/host/{id}/webshell", get(terminal::webshell))

            // Login-directory transfers
            .route(
                "/api/host/{id}/upload",
                post(api::upload_to_home).layer(upload_limit),
            )
            .route("/api/host/{id}/download", get(api::download_from_home))

            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn HostRegistry>,
    pub config: Arc<ServerConfig>,
    /// Browser origins allowed to open a terminal
    pub origins: Arc<OriginPolicy>,
    pub staging: StagingConfig,
}
