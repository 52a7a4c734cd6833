//! API gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server (request id, trace, timeout, limit)
//!                         │
//!                         ▼
//!                     routing::table ── snapshot lookup ──▶ NoMatch (404)
//!                         │
//!                         ▼
//!                     filters::chain  ── pre-phase ──▶ short-circuit (4xx)
//!                         │
//!                         ▼
//!                     dispatch ── load_balancer ── resilience ──▶ backend
//!                         │
//!                         ▼
//!                     filters::chain  ── post-phase (reverse order)
//!     ◀──────────────     │
//!     Client Response
//!
//!     Background: health::active, discovery::poller, config::watcher,
//!                 lifecycle::signals, admin API, metrics exporter
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use api_gateway::admin::setup_admin_router;
use api_gateway::config::watcher::ConfigWatcher;
use api_gateway::lifecycle::{signals, startup, Shutdown, StartupError};
use api_gateway::observability::{logging, metrics};
use api_gateway::{GatewayServer, GatewayState};

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(version, about = "Configuration-driven HTTP API gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.check {
        return match startup::load_initial_config(args.config.as_deref()) {
            Ok(config) => {
                println!(
                    "configuration OK: {} route(s), {} service(s)",
                    config.routes.len(),
                    config.services.len()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed to start");
            eprintln!("api-gateway: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = startup::load_initial_config(args.config.as_deref())?;
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        services = config.services.len(),
        "api-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut state = GatewayState::new(config.clone())?;
    if let Some(path) = &args.config {
        state = state.with_config_path(path);
    }
    let server = GatewayServer::from_state(state);
    let state = server.state();
    let shutdown = Shutdown::new();

    // Config file watching. The watcher must stay alive for events to flow.
    let (update_tx, update_rx) = tokio::sync::mpsc::unbounded_channel();
    let _watcher = match &args.config {
        Some(path) => match ConfigWatcher::with_sender(path, update_tx).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Config file watching disabled");
                None
            }
        },
        None => None,
    };

    let reload_state = state.clone();
    tokio::spawn(signals::listen(shutdown.clone(), move || {
        let state = reload_state.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = state.reload_from_disk() {
                tracing::error!(error = %e, "Reload failed, previous configuration kept");
            }
        });
    }));

    if config.admin.enabled {
        let listener = startup::bind_listener(&config.admin.bind_address).await?;
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        let admin = setup_admin_router(state.clone());
        let mut admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(listener, admin)
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    let listener = startup::bind_listener(&config.listener.bind_address).await?;
    if let Err(e) = server.run(listener, update_rx, shutdown.subscribe()).await {
        tracing::error!(error = %e, "HTTP server error");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
