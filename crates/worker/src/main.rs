//! Transfer worker entry point.

use clap::Parser;
use saga::{InMemoryBank, money_transfer};
use tokio::signal;
use worker::config::WorkerArgs;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = WorkerArgs::parse();

    // 1. Initialize tracing
    worker::telemetry::init_tracing(&args.client);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = worker::telemetry::install_metrics()?;

    // 3. Validate configuration
    args.reject_tls()?;
    let options = args.activity_options()?;

    // 4. Register the steps and recover interrupted runs
    let bank = InMemoryBank::with_sample_accounts();
    let engine = worker::create_default_engine(args.client.namespace(), bank, options)?;
    let recovered = engine.recover().await?;
    if !recovered.is_empty() {
        tracing::info!(count = recovered.len(), "resumed incomplete transfers");
    }

    // 5. Build the application
    let app = worker::create_app(engine, metrics_handle);

    // 6. Start server
    let addr = &args.client.address;
    tracing::info!(
        %addr,
        namespace = %args.client.namespace,
        task_queue = money_transfer::TASK_QUEUE,
        "starting transfer worker"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("worker shut down gracefully");
    Ok(())
}
