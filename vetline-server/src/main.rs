use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};
use vetline_core::VetlineConfig;

use vetline_server::server;
use vetline_server::subsystems::gateway::Gateway;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "vetline.toml")]
    config: String,

    /// Validate the configuration and responder roster, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience - production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match VetlineConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.as_str()));
    fmt().with_env_filter(filter).init();

    let gateway = match Gateway::from_config(&config) {
        Ok(g) => Arc::new(g),
        Err(e) => {
            eprintln!("Failed to initialise gateway: {}", e);
            std::process::exit(1);
        }
    };

    if args.check {
        let health = gateway.health().await;
        println!("✅ Config loaded from {}", args.config);
        println!(
            "✅ {} responders ({} available)",
            health.responders, health.available_responders
        );
        println!("✅ Assistant backend: {}", health.assistant_backend);
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Acceptance and inactivity timeouts
    tokio::spawn(vetline_server::subsystems::sweeper::run_sweeper(
        Arc::clone(&gateway),
        config.session.clone(),
        tx.subscribe(),
    ));

    let mut http_task = None;
    if config.http.enabled {
        let http_gateway = Arc::clone(&gateway);
        let http_config = config.clone();
        let http_shutdown = tx.subscribe();
        http_task = Some(tokio::spawn(async move {
            if let Err(e) =
                vetline_server::http::start_http_server(http_gateway, http_config, http_shutdown).await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        }));
    }

    let socket_path = config.service.socket_path.trim();
    if socket_path.is_empty() {
        let mut shutdown = tx.subscribe();
        let _ = shutdown.recv().await;
    } else {
        server::run_unix_server(socket_path, gateway, tx.subscribe()).await?;
    }

    if let Some(task) = http_task {
        let _ = task.await;
    }

    Ok(())
}
