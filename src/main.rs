mod config;
mod connection;
mod error;
mod events;
mod files;
mod git;
mod handlers;
mod history;
mod output;
mod protocol;
mod session;
mod state;
mod watch;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{Args, WorkspacesConfig};
use events::{ClientHub, Publisher};
use history::HistoryIndex;
use session::registry::SessionRegistry;
use state::DaemonState;
use watch::WatchTracker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI arguments
    let args = Args::parse();

    // Determine token
    let token = if args.require_auth() {
        match &args.token {
            Some(t) => Some(t.clone()),
            None => {
                error!("Token required. Use --token or set CONDUIT_DAEMON_TOKEN");
                std::process::exit(1);
            }
        }
    } else {
        warn!("Auth disabled (--insecure-no-auth). Do not use in production!");
        None
    };

    // Load workspace config
    let data_dir = args.data_dir();
    info!("Data directory: {}", data_dir.display());

    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        info!("Created data directory: {}", data_dir.display());
    }

    let workspaces_config = WorkspacesConfig::load(&data_dir)?;
    let workspaces = workspaces_config.to_workspace_infos();
    info!("Loaded {} workspace(s)", workspaces.len());

    // Validate workspace paths exist
    for workspace in &workspaces {
        let path = std::path::Path::new(&workspace.path);
        if !path.exists() {
            warn!("Workspace path does not exist: {}", workspace.path);
        }
    }

    // Wire the orchestration core
    let history = Arc::new(HistoryIndex::new(args.history_root()));
    let hub = Arc::new(ClientHub::new());
    let watches = Arc::new(WatchTracker::new());
    let publisher = Publisher::new(hub.clone(), watches.clone());
    let registry = SessionRegistry::new(
        history.clone(),
        publisher,
        watches.clone(),
        args.backend_config(),
    );

    let state = Arc::new(DaemonState::new(
        token, workspaces, hub, watches, registry, history,
    ));

    // Bind TCP listener
    let listener = TcpListener::bind(&args.listen).await?;
    info!("Listening on {}", args.listen);

    // Accept loop
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    connection::handle_client(stream, state).await;
                });
            }
            Err(e) => {
                error!("Accept error: {e}");
            }
        }
    }
}
