//! h402 facilitator HTTP server.
//!
//! ```bash
//! h402-facilitator --config /etc/h402/config.toml
//! RUST_LOG=debug CONFIG=config.toml h402-facilitator
//! ```
//!
//! Environment:
//!
//! - `CONFIG` - configuration file (default `config.toml`)
//! - `HOST` / `PORT` - override the bind address
//! - `RUST_LOG` - log filter (default `info`)
//! - `OTEL_EXPORTER_OTLP_*` - enable OTLP export
//!
//! A `.env` file in the working directory is loaded first.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use clap::Parser;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;

use h402_facilitator::chains::build_registry;
use h402_facilitator::config::FacilitatorConfig;
use h402_facilitator::handlers::facilitator_router;
use h402_facilitator::telemetry::Telemetry;
use h402_facilitator::util::SigDown;

#[derive(Debug, Parser)]
#[command(name = "h402-facilitator", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _telemetry = match Telemetry::init() {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        tracing::error!("Facilitator failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config = FacilitatorConfig::load_from(&args.config)?;
    tracing::info!(
        config = %args.config.display(),
        host = %config.host,
        port = config.port,
        networks = config.network_count(),
        "Loaded configuration"
    );

    let registry = Arc::new(build_registry(&config)?);

    let app = facilitator_router(registry)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let sig_down = SigDown::try_new()?;
    let shutdown = sig_down.cancellation_token();

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Facilitator listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    sig_down.recv().await;
    tracing::info!("Facilitator shut down gracefully");
    Ok(())
}
