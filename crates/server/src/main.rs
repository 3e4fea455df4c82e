//! slogger: secure log ingestion and query service.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info};

use slogger_core::Hasher;
use slogger_server::config::{Config, Protocol, ServiceConfig, ServiceType};
use slogger_server::store::Store;
use slogger_server::{http, syslog, tls, AppState, SharedState};

#[derive(Debug, Parser)]
#[command(name = "slogger", about = "Secure log ingestion and query service")]
struct Cli {
    /// Path to a JSON config file; built-in defaults apply without it.
    #[arg(long)]
    configfile: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.configfile {
        Some(path) => Config::from_file(path),
        None => Ok(Config::built_in()),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "cannot load configuration");
            std::process::exit(1);
        }
    };

    let store = match Store::open(&config.db.path, &config.db.collection) {
        Ok(store) => store,
        Err(err) => {
            error!(%err, path = %config.db.path, "cannot open store");
            std::process::exit(1);
        }
    };
    info!(path = %config.db.path, collection = %config.db.collection, "store ready");

    let state = AppState::shared(
        store,
        Hasher::new(config.chain.secret.clone()),
        config.chain.shard_group,
    );

    for service in &config.services {
        if let Err(err) = start_service(service, state.clone()).await {
            error!(%err, listen = %service.listen, "cannot start service");
            std::process::exit(1);
        }
    }

    shutdown_signal().await;
}

async fn start_service(
    service: &ServiceConfig,
    state: SharedState,
) -> Result<(), Box<dyn std::error::Error>> {
    match (service.service_type, service.protocol) {
        (ServiceType::Syslog, Protocol::Udp) => {
            let socket = UdpSocket::bind(&service.listen).await?;
            info!(listen = %service.listen, "starting syslog udp");
            tokio::spawn(syslog::run_udp(socket, state));
        }
        (ServiceType::Syslog, Protocol::Tcp) => {
            let listener = TcpListener::bind(&service.listen).await?;
            let acceptor = tls::acceptor_for(service)?;
            if acceptor.is_some() {
                info!(listen = %service.listen, "starting syslog tcp+tls");
            } else {
                info!(listen = %service.listen, "starting syslog tcp");
            }
            tokio::spawn(syslog::run_tcp(listener, state, acceptor));
        }
        (ServiceType::Rest, _) => {
            let listener = TcpListener::bind(&service.listen).await?;
            let router = http::router(state);
            match tls::acceptor_for(service)? {
                Some(acceptor) => {
                    info!(listen = %service.listen, "starting https");
                    tokio::spawn(async move {
                        if let Err(err) = http::serve_https(listener, acceptor, router).await {
                            error!(%err, "https server terminated");
                        }
                    });
                }
                None => {
                    info!(listen = %service.listen, "starting http");
                    tokio::spawn(async move {
                        if let Err(err) = http::serve_http(listener, router).await {
                            error!(%err, "http server terminated");
                        }
                    });
                }
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    info!("shutting down");
}
